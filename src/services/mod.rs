/// OpenAPI documentation generation.
pub mod documentation;
/// Outbound frames and per-session event fan-out.
pub mod events;
/// Connection gate: bearer credential verification.
pub mod gate;
/// Health check service.
pub mod health_service;
/// Quiz engine commands.
pub mod session_service;
/// Storage connection supervisor with degraded mode handling.
pub mod storage_supervisor;
/// WebSocket connection and command routing.
pub mod websocket_service;
