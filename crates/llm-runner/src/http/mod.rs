//! Client side of the runner's HTTP protocol.
//!
//! | Endpoint      | Method | Body               | Response                              |
//! |---------------|--------|--------------------|---------------------------------------|
//! | `/`           | HEAD   |                    | `200` when healthy                    |
//! | `/completion` | POST   | prompt + sampling  | `data: {json}` lines, last has `stop` |
//! | `/tokenize`   | POST   | `{content}`        | `{tokens}`                            |
//! | `/detokenize` | POST   | `{tokens}`         | `{content}`                           |
//! | `/embedding`  | POST   | `{content}`        | `{embedding}`                         |
mod client;
pub mod schemas;
pub mod sse;


pub use client::{InferenceClient, PredictStream};
