mod common;
mod remote_flow;
mod run_flow;
