#![doc = "distributor-core: registered-data rewriting and distribution pipeline."]

//! This crate holds the logic that copies content between sites and keeps the
//! references embedded in it (media, posts, terms, custom data) pointing at the
//! right local copies. Storage, transport, users and scheduling are reached
//! through the traits in [`contract`].
//!
//! # Usage
//! Build a [`registry::Registry`], bundle it with the collaborators into a
//! [`site::Site`], then use [`processor::RegisteredDataHandler`],
//! [`distribute::Distributor`] and [`auto_distribute::AutoDistributor`].

pub mod auto_distribute;
pub mod config;
pub mod contract;
pub mod distribute;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod identity;
pub mod json_blocks;
pub mod model;
pub mod processor;
pub mod registry;
pub mod shortcode;
pub mod site;
pub mod walker;
