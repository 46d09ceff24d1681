//! Web dashboard for uploading an image, optionally scheduling it, and handing
//! it to the Instagram Graph API through an asset host.
//!
//! - [`config`]: credential loading and the environment status shown in the UI
//! - [`assets`]: asset host upload client
//! - [`graph`]: publish/schedule client and the read endpoints
//! - [`server`]: router, shared state and `POST /api/publish`
//! - [`dashboard`]: the `GET /` page
//! - [`form`]: upload form validation and submission state machine
//! - [`posts`]: scheduled post model and list rendering

pub mod assets;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod form;
pub mod graph;
pub mod params;
pub mod posts;
pub mod server;
pub mod signing;
