//! URI 解析的性质测试。
//!
//! - **Why**：端点来自配置与用户输入，手写用例覆盖不到的组合（奇怪的 scheme 字符、
//!   极端端口、随机噪声）同样不能让解析器 panic 或改写输入。
//! - **What**：
//!   1. 由合法分量拼出的 URI 能被还原出相同分量，且 `Display` 返回原文；
//!   2. 任意输入要么被拒绝，要么 `Display` 原样返回；
//!   3. 含空白的输入与越界端口一律拒绝。

use proptest::prelude::*;
use spark_mux::{Endpoint, PORT_UNSET, Uri};

fn scheme() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9+.-]{0,8}"
}

fn host() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z][a-z0-9-]{0,12}(\\.[a-z]{2,5}){0,2}",
        (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>())
            .prop_map(|(a, b, c, d)| format!("{a}.{b}.{c}.{d}")),
        Just("[::1]".to_owned()),
    ]
}

fn path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-zA-Z0-9_.-]{1,6}", 0..4).prop_map(|segments| {
        segments
            .iter()
            .map(|segment| format!("/{segment}"))
            .collect::<String>()
    })
}

proptest! {
    #[test]
    fn composed_uris_round_trip(
        scheme in scheme(),
        host in host(),
        port in proptest::option::of(any::<u16>()),
        path in path(),
        query in proptest::option::of("[a-z0-9=&]{0,10}"),
    ) {
        let mut input = format!("{scheme}://{host}");
        if let Some(port) = port {
            input.push_str(&format!(":{port}"));
        }
        input.push_str(&path);
        if let Some(query) = &query {
            input.push('?');
            input.push_str(query);
        }

        let uri = Uri::parse(&input).unwrap();
        prop_assert_eq!(uri.scheme(), Some(scheme.as_str()));
        prop_assert_eq!(uri.host(), Some(host.as_str()));
        prop_assert_eq!(uri.port(), port);
        prop_assert_eq!(
            uri.port_or_unset(),
            port.map_or(PORT_UNSET, i32::from)
        );
        prop_assert_eq!(uri.path(), path.as_str());
        prop_assert_eq!(uri.query(), query.as_deref());
        prop_assert_eq!(uri.to_string(), input);
    }

    #[test]
    fn arbitrary_input_is_rejected_or_preserved(input in any::<String>()) {
        if let Ok(uri) = Uri::parse(&input) {
            prop_assert_eq!(uri.to_string(), input.clone());
            let endpoint = Endpoint::acceptor(&input).unwrap();
            prop_assert_eq!(endpoint.to_string(), input);
        }
    }

    #[test]
    fn whitespace_is_rejected(
        prefix in "[a-z]{1,5}://[a-z]{1,5}",
        suffix in "[a-z/]{0,5}",
        blank in prop_oneof![Just(' '), Just('\t'), Just('\n')],
    ) {
        let input = format!("{prefix}{blank}{suffix}");
        let err = Uri::parse(&input).unwrap_err();
        prop_assert_eq!(err.code(), "spark.mux.invalid_endpoint");
    }

    #[test]
    fn out_of_range_ports_are_rejected(port in 65_536u32..1_000_000) {
        let err = Uri::parse(&format!("tcp://host:{port}")).unwrap_err();
        prop_assert_eq!(err.code(), "spark.mux.invalid_endpoint");
    }
}
