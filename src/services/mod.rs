// Raindrop Sync services
// Services hold the sync logic: remote client, tree builder, change detector, reconciler, lifecycle, settings.

pub mod change_detector;
pub mod collection_tree;
pub mod raindrop_client;
pub mod settings_engine;
pub mod status_channel;
pub mod sync_controller;
pub mod sync_engine;
