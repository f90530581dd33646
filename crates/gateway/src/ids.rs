//! Opaque id generation. Every entity id in this system is a fixed-prefix
//! plus 12 lowercase hex characters (6 random bytes) — short enough to
//! read in a log line, long enough that collisions are not a practical
//! concern at this service's scale (single active job, modest session
//! counts).

use rand::RngCore;

fn random_hex12() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn job_id() -> String {
    random_hex12()
}

pub fn session_id() -> String {
    format!("chat_{}", random_hex12())
}

pub fn message_id() -> String {
    format!("msg_{}", random_hex12())
}

pub fn run_id() -> String {
    format!("run_{}", random_hex12())
}
