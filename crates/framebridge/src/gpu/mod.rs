//! GPU-facing half of the bridge.
//!
//! - `pipeline` owns the one-time fixed-function setup: target surface
//!   texture, fullscreen quad geometry, sampler, and the render pipeline
//!   that samples the surface into the host's output target.
//! - `upload` is the producer path: it packs raw pixels into a transient
//!   staging buffer, records the surface copy into a command batch, and
//!   publishes it through the slot registry.
//! - `timing` is the optional timestamp diagnostic bracketing each upload,
//!   with amortised result collection so the producer never stalls on GPU
//!   latency.

pub(crate) mod pipeline;
pub mod timing;
pub mod upload;
