// Core modules: record layout, shared files, named objects, and the write protocol.
pub mod error;
pub mod guard;
pub mod io;
pub mod producer;
pub mod record;
pub mod store;
pub mod sync;
pub mod wait;
