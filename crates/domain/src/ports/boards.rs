use crate::DomainResult;
use crate::boards::{Board, Pipeline, Stage};
use crate::ports::BoxFuture;

/// Read-only containment hierarchy; this engine never mutates it.
pub trait BoardHierarchy: Send + Sync {
    fn get_stage(&self, stage_id: &str) -> BoxFuture<'_, DomainResult<Stage>>;

    fn get_pipeline(&self, pipeline_id: &str) -> BoxFuture<'_, DomainResult<Pipeline>>;

    fn get_board(&self, board_id: &str) -> BoxFuture<'_, DomainResult<Board>>;
}
