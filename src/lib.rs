//! Medical Image Segmentation Backend
//!
//! This library provides the core functionality for the medseg-backend
//! service: an asynchronous pipeline that converts uploaded 2D medical
//! images into NIfTI volumes, runs them through an external segmentation
//! model, and exposes status and result retrieval backed by an
//! S3-compatible object store.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
