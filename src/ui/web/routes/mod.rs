pub(crate) mod auth;
pub(crate) mod download;
pub(crate) mod events;
pub(crate) mod formats;
pub(crate) mod index;
pub(crate) mod jobs;
pub(crate) mod library;
pub(crate) mod status;
