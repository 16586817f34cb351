// export/mod.rs - Serialisation Surface

//! Renderings consumed by external tooling: Graphviz DOT for CFGs and
//! grammar-faithful local Scribble text for CFSMs. JSON comes straight
//! from the serde derives on the pipeline types (`Cfg::to_json`,
//! `Cfsm::to_json`, `Report::to_json`, `Trace::to_json`).

mod dot;
mod local_text;

pub use dot::cfg_to_dot;
pub use local_text::cfsm_to_local_scribble;
