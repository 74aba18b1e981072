pub mod maintenance_task;
pub mod work_dispatcher;
