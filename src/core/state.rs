//! 循环状态机定义：LoopPhase 与对外的 LoopResult

use serde::Serialize;

/// ReAct 循环所处阶段
///
/// AwaitingModel -> DispatchingTools -> AwaitingModel 往复，直至 Done（模型给出最终答案）或
/// Aborted（步数上限、取消、超时）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    AwaitingModel,
    DispatchingTools,
    Done,
    Aborted,
}

/// 循环终止原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// 模型返回了不含工具调用的回复
    ModelFinished,
    /// 达到 max_iterations
    MaxIterationsReached,
    /// 调用方通过 CancellationToken 取消
    Cancelled,
    /// 超出整体墙钟预算
    TimedOut,
}

impl Termination {
    /// 对应的终止状态
    pub fn phase(self) -> LoopPhase {
        match self {
            Termination::ModelFinished => LoopPhase::Done,
            _ => LoopPhase::Aborted,
        }
    }
}

/// 单次循环结果，构造后不可变
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoopResult {
    pub final_answer: String,
    /// 模型网关被调用的次数
    pub iteration_count: usize,
    pub terminated_by: Termination,
}

impl LoopResult {
    pub fn is_finished(&self) -> bool {
        self.terminated_by == Termination::ModelFinished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_phase() {
        assert_eq!(Termination::ModelFinished.phase(), LoopPhase::Done);
        assert_eq!(Termination::MaxIterationsReached.phase(), LoopPhase::Aborted);
        assert_eq!(Termination::Cancelled.phase(), LoopPhase::Aborted);
        assert_eq!(Termination::TimedOut.phase(), LoopPhase::Aborted);
    }
}
