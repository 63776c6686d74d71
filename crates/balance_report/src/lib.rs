//! Daily balance reports for Ethereum accounts.
//!
//! - `net::rpc`: JSON-RPC client, the block and balance source
//! - `report`: schedule construction and the timeline reporter
//! - `output`: CSV / JSONL serialization of report rows
//! - `store`: JSONL cache of block timestamps shared between runs
pub mod net;
pub mod output;
pub mod report;
pub mod store;
