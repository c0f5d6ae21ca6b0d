use std::io;

use spark_mux::MuxError;
use tracing::debug;

/// 一次底层套接字操作对应的稳定错误码与文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const RESOLVE: OperationKind = OperationKind {
    code: "spark.mux.tcp.resolve_failed",
    message: "tcp resolve",
};
pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.mux.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "spark.mux.tcp.accept_failed",
    message: "tcp accept",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "spark.mux.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "spark.mux.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "spark.mux.tcp.write_failed",
    message: "tcp write",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.mux.tcp.configure_failed",
    message: "tcp configure",
};

/// 把 IO 错误映射为携带本操作错误码的 [`MuxError::Transport`]，并以 DEBUG 级别记录。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> MuxError {
    debug!(
        target: crate::LOG_TARGET,
        code = kind.code,
        error = %error,
        "{} failed",
        kind.message
    );
    MuxError::transport(kind.code, kind.message, error)
}
