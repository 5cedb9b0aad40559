pub mod proc;
pub mod run;
pub mod scheduler;

pub use self::run::RunState;
pub use self::scheduler::LocalScheduler;
