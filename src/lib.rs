// Library for tests to access modules

pub mod alerts;
pub mod app;
pub mod collector;
pub mod config;
pub mod docker;
pub mod logs;
pub mod models;
pub mod notifier;
pub mod repo;
pub mod retention;
pub mod web;
