//! Serverless invocation forecasting
//!
//! Trains a per-project sequence model on historical invocation logs and
//! predicts the gap before each function's next invocation.

pub mod commands;
