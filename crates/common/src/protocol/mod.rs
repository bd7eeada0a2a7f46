// Wire protocol: realtime channel events and REST endpoint shapes.

pub mod events;
pub mod rest;
