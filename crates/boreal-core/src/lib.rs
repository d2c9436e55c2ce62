pub mod channel;
pub mod context;
pub mod decorrelate;
pub mod dependents;
pub mod error;
pub mod estimator;
pub mod flags;
pub mod fork;
pub mod frame;
pub mod integration;
pub mod mode;
pub mod options;
pub mod phase;
pub mod pipeline;
pub mod recycler;
pub mod scan;
pub mod signal;
pub mod simulate;
pub mod tasks;
