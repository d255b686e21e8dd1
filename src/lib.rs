//! # doxa
//!
//! A bitemporal, multi-mind belief engine for simulated agents: versioned
//! beliefs over stable subject identities, archetype-based composition,
//! nested minds (one agent's model of another's knowledge), and
//! certainty-weighted recall.
//!
//! ## Architecture
//!
//! - **Identity** (`ident`, `subject`): monotone ID allocation, subject
//!   identities stable across versions and mind boundaries
//! - **Schema** (`schema`): traittypes and archetypes with multi-inheritance,
//!   resolved once at world setup
//! - **Timelines** (`state`, `mind`): insert/remove deltas over base states,
//!   transaction/valid time, lock propagation, union-state convergence
//! - **Valuation** (`belief`, `compose`): versioned trait bindings with
//!   breadth-first base-chain resolution and creation-time composition
//! - **Query** (`revindex`, `recall`): reverse subject indexes and
//!   certainty-combining recall into [`recall::Notion`]s
//! - **Persistence** (`serial`): typed JSON envelopes with two-phase load
//!
//! ## Library usage
//!
//! ```no_run
//! use doxa::world::World;
//! use doxa::schema::SchemaDecl;
//!
//! let world = World::new().unwrap();
//! let schema: SchemaDecl = serde_json::from_str(r#"{
//!     "traittypes": { "color": "string" },
//!     "archetypes": { "Thing": { "traits": { "color": "gray" } } },
//!     "prototypes": {}
//! }"#).unwrap();
//! world.register(schema).unwrap();
//! ```

pub mod belief;
pub mod compose;
pub mod error;
pub mod fuzzy;
pub mod ident;
pub mod inspect;
pub mod mind;
pub mod recall;
pub mod revindex;
pub mod schema;
pub mod serial;
pub mod state;
pub mod subject;
pub mod value;
pub mod world;
