//! Game simulation modules

pub mod outcome;
pub mod physics;
pub mod scheduler;
pub mod state;
pub mod validator;
