mod client;

pub use client::HdxClient;
