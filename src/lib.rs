//! Deployment service for Gradio apps hosted on a Forgejo instance.
//!
//! A push webhook (or a manual API call) turns a repo branch into a running
//! container: the source is cloned, an image is built from the repo's own
//! Dockerfile, a host port is allocated from a fixed band, and the container
//! is started with a deterministic name. Deployments are recorded in a
//! persistent registry and exposed through a path-based reverse proxy at
//! `/{owner}/{repo}/...`.

pub mod api;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod fetch;
pub mod health;
pub mod image;
pub mod ports;
pub mod proxy;
pub mod registry;
pub mod runtime;
pub mod server;
