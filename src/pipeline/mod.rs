//! 工作流管线：intake → analysis → routing → execution → progress → quality → refinement
//!
//! 每个组件只通过参数与返回值和 Supervisor 交互，不持有运行级状态。

pub mod cache;
pub mod events;
pub mod execution;
pub mod intake;
pub mod progress;
pub mod quality;
pub mod refinement;
pub mod router;
pub mod types;

pub use cache::{AnalysisCache, CacheStats};
pub use events::{EventSink, RunEvent, SupervisorEvent};
pub use execution::{ExecutionCoordinator, ExecutionFailure, ExecutionReport, Resume};
pub use intake::{IntakeOutcome, TaskIntake};
pub use progress::{PhaseBudget, ProgressDecision, ProgressTracker};
pub use quality::QualityGate;
pub use refinement::{Candidate, RefinementDecision, RefinementLoop};
pub use router::{normalize_proposal, Router};
pub use types::{
    AgentAssignment, AgentResult, AnalysisResult, AnalysisStep, CaveatReason, Complexity,
    EdgeCaseWarning, JudgeVerdict, ProposedAgent, QualityAssessment, QualityCaveat,
    QualityCriteria, QualityReport, RefinementFeedback, RouteProposal, RoutedAgent,
    RouterOutcome, RoutingDecision, RunAnswer, RunFailure, RunOutcome, RunSummary, Strategy,
    Task,
};
