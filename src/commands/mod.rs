//! Command Dispatch Module
//!
//! Turns a client text line into a [`types::Command`] and runs it against the local keyspace.
//!
//! ## Verb Tables
//! - **Mutations**: `SET`, `DEL`, `INC`, `DEC`, `INCF`, `DECF`, `APPEND`, `PREPEND`, `EXPIRE`.
//! - **Queries**: `GET`, `GETP`, `TTL`, `PREFSCAN`, `FUZZYSCAN`.
//! - **Enumerations**: `COUNT`, `KEYS`, `VALUES` over the whole local keyspace.
//! - **Service**: `FLUSH`.
//!
//! `QUIT` and `EXIT` end the session. Every outcome, errors included, is a
//! newline-terminated [`types::Reply`].

pub mod handlers;
pub mod parser;
pub mod types;
