//! 多路复用契约：操作位、通道与 Handler 能力集。
//!
//! # 教案级导览
//!
//! - **Why**：会话提供者与选择器引擎往往由不同团队独立实现，二者之间唯一的共同语言就是
//!   “Handler 关心哪些操作”与“Handler 能做什么”。本模块只定义词汇，不包含任何行为。
//! - **What**：
//!   - [`OpFlags`]：`OPEN=0x1, READ=0x2, WRITE=0x4, CLOSE=0x8` 的位掩码，按位或组合、按位与测试；
//!     该位布局是跨组件契约，必须逐位保持；
//!   - [`Channel`]：Handler 终生绑定的通道，向引擎暴露标识与（可选的）OS 描述符；
//!   - [`Handler`]：`do_open`/`do_read`/`do_write`/`do_close` 四个回调。
//! - **How**：组合位之间相互独立：为 `READ | WRITE` 注册等价于对同一 Handler 做两次单位注册，
//!   注销其中一位不得影响另一位。

use core::{
    fmt,
    ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Sub},
};
use std::{io, sync::Arc};

/// Handler 关心的操作集合。
///
/// # 契约说明（What）
/// - 仅低四位有效，[`OpFlags::from_bits`] 拒绝其他位；
/// - `OPEN`/`CLOSE` 为一次性操作，由引擎在下一轮 `poll` 中各触发一次；
/// - `READ`/`WRITE` 为持续兴趣，直到被注销。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct OpFlags(u8);

impl OpFlags {
    /// 空集合。
    pub const NONE: Self = Self(0);
    /// 打开通道。
    pub const OPEN: Self = Self(0x1);
    /// 可读。
    pub const READ: Self = Self(0x2);
    /// 可写。
    pub const WRITE: Self = Self(0x4);
    /// 关闭通道。
    pub const CLOSE: Self = Self(0x8);
    /// 全部四个操作位。
    pub const ALL: Self = Self(0xF);

    const NAMES: [(Self, &'static str); 4] = [
        (Self::OPEN, "OPEN"),
        (Self::READ, "READ"),
        (Self::WRITE, "WRITE"),
        (Self::CLOSE, "CLOSE"),
    ];

    /// 从原始位构造；包含未定义的位时返回 `None`。
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL.0 == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    /// 从原始位构造，丢弃未定义的位。
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// 返回原始位。
    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// `other` 的每一位都在 `self` 中。
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// 至少有一位重叠。
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// 持续兴趣部分（`READ | WRITE`）。
    pub const fn io(self) -> Self {
        self.intersection(Self::READ.union(Self::WRITE))
    }

    /// 一次性操作部分（`OPEN | CLOSE`）。
    pub const fn one_shot(self) -> Self {
        self.intersection(Self::OPEN.union(Self::CLOSE))
    }

    /// 逐位迭代，顺序固定为 OPEN、READ、WRITE、CLOSE。
    pub fn iter(self) -> impl Iterator<Item = Self> {
        Self::NAMES
            .into_iter()
            .map(|(flag, _)| flag)
            .filter(move |flag| self.contains(*flag))
    }
}

impl BitOr for OpFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for OpFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl BitAnd for OpFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl BitAndAssign for OpFlags {
    fn bitand_assign(&mut self, rhs: Self) {
        *self = self.intersection(rhs);
    }
}

impl Sub for OpFlags {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.difference(rhs)
    }
}

impl fmt::Debug for OpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// 通道标识，仅用于日志、诊断与失败报告。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handler 终生绑定的通道。
///
/// # 契约说明（What）
/// - `id`：在同一选择器内应唯一，用于失败报告；
/// - `raw_fd`：就绪引擎需要向内核登记的描述符；无描述符的内存通道返回 `None`，
///   此类 Handler 只能交给轮询引擎驱动；
/// - 描述符在 Handler 注册期间必须保持有效，关闭描述符前应先注销或请求 `CLOSE`。
pub trait Channel: Send + Sync {
    fn id(&self) -> ChannelId;

    #[cfg(unix)]
    fn raw_fd(&self) -> Option<std::os::fd::RawFd> {
        None
    }
}

/// 由选择器驱动的回调能力集。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“何时就绪”与“就绪后做什么”解耦：引擎只负责前者，Handler 负责后者；
/// - `budget` 是公平性旋钮，限制单次回调可搬运的最大字节数，避免一个繁忙连接饿死其他连接。
///
/// ## 契约（What）
/// - 全部回调在调用 `poll` 的线程上执行，必须短小且非阻塞；
/// - `do_read`/`do_write` 返回本次搬运的字节数，不得超过 `budget`；
/// - 返回值小于 `budget` 表示 Handler 已经读/写到 `WouldBlock`；
///   返回值等于 `budget` 表示可能仍有剩余，就绪引擎会在下一轮无等待地再次调度；
/// - 返回 `WouldBlock`/`Interrupted` 等价于返回 `Ok(0)`；其他错误会使引擎注销该 Handler；
/// - 回调内部调用同一选择器的 `register`/`deregister` 是允许的，但变更对当前这一轮不可见。
///
/// ## 风险提示（Trade-offs）
/// - 回调签名使用 `&self`，Handler 需要自行用内部可变性管理状态；
///   这让同一个 `Arc` 可以同时被选择器与会话持有。
pub trait Handler: Send + Sync + 'static {
    /// 返回绑定的通道。
    fn channel(&self) -> &dyn Channel;

    /// 处理一次 `OPEN`。
    fn do_open(&self) -> io::Result<()> {
        Ok(())
    }

    /// 在可读时被调用。
    fn do_read(&self, budget: usize) -> io::Result<usize>;

    /// 在可写时被调用。
    fn do_write(&self, budget: usize) -> io::Result<usize>;

    /// 处理一次 `CLOSE`。
    fn do_close(&self) -> io::Result<()> {
        Ok(())
    }
}

/// 选择器持有的 Handler 引用。
pub type HandlerRef = Arc<dyn Handler>;

/// 以数据指针判定两个引用是否为同一个 Handler 实例（忽略 vtable 元数据）。
pub(crate) fn same_handler(left: &HandlerRef, right: &HandlerRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_layout_is_preserved() {
        assert_eq!(OpFlags::OPEN.bits(), 0x1);
        assert_eq!(OpFlags::READ.bits(), 0x2);
        assert_eq!(OpFlags::WRITE.bits(), 0x4);
        assert_eq!(OpFlags::CLOSE.bits(), 0x8);
        assert_eq!((OpFlags::READ | OpFlags::WRITE).bits(), 0x6);
    }

    #[test]
    fn from_bits_rejects_unknown_bits() {
        assert_eq!(OpFlags::from_bits(0x6), Some(OpFlags::READ | OpFlags::WRITE));
        assert_eq!(OpFlags::from_bits(0x10), None);
        assert_eq!(OpFlags::from_bits_truncate(0x13), OpFlags::OPEN | OpFlags::READ);
    }

    #[test]
    fn io_and_one_shot_partition_the_mask() {
        let all = OpFlags::ALL;
        assert_eq!(all.io(), OpFlags::READ | OpFlags::WRITE);
        assert_eq!(all.one_shot(), OpFlags::OPEN | OpFlags::CLOSE);
        assert_eq!(all.io() | all.one_shot(), all);
        assert!(!all.io().intersects(all.one_shot()));
    }

    #[test]
    fn removing_one_flag_keeps_the_other() {
        let both = OpFlags::READ | OpFlags::WRITE;
        let left = both - OpFlags::READ;
        assert!(left.contains(OpFlags::WRITE));
        assert!(!left.contains(OpFlags::READ));
    }

    #[test]
    fn debug_lists_flag_names() {
        assert_eq!(format!("{:?}", OpFlags::READ | OpFlags::CLOSE), "READ | CLOSE");
        assert_eq!(format!("{:?}", OpFlags::NONE), "NONE");
        let order: Vec<_> = OpFlags::ALL.iter().collect();
        assert_eq!(
            order,
            vec![OpFlags::OPEN, OpFlags::READ, OpFlags::WRITE, OpFlags::CLOSE]
        );
    }
}
