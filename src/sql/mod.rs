pub mod queue;
pub mod task;
pub mod ticker;

/// Task columns along with the derived status, `t` being the task alias
pub(crate) fn task_select(escaped_schema: &str) -> String {
    format!("t.*, {escaped_schema}.queue_task_status(t)::text as status")
}
