mod breakpoints;
mod connection;
mod populate;
mod run_control;
mod values;
