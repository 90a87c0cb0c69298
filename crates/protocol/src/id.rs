//! Short random identifiers for clients and transfer jobs.

use rand::Rng;

/// Characters an ID is drawn from.
pub const CHARSET: &[u8] = b"QWERTYUIOPASDFGHJKLZXCVBNMqwertyuiopasdfghjklzxcvbnm1234567890";

/// Length of a generated ID.
pub const ID_LEN: usize = 4;

/// Attempts made by [`generate_unique_id`] before giving up.
pub const MAX_ID_ATTEMPTS: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("no unique ID found after {0} attempts")]
    Exhausted(usize),
}

/// Generates a random 4-character alphanumeric ID.
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Generates an ID for which `is_taken` returns false.
///
/// Callers that share the ID space across threads must hold their lock
/// across this call and the insert that follows it.
pub fn generate_unique_id(mut is_taken: impl FnMut(&str) -> bool) -> Result<String, IdError> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let id = generate_id();
        if !is_taken(&id) {
            return Ok(id);
        }
    }
    Err(IdError::Exhausted(MAX_ID_ATTEMPTS))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn id_shape() {
        for _ in 0..100 {
            let id = generate_id();
            assert_eq!(id.len(), ID_LEN);
            assert!(id.bytes().all(|b| CHARSET.contains(&b)));
        }
    }

    #[test]
    fn skips_taken_ids() {
        let mut calls = 0;
        let id = generate_unique_id(|_| {
            calls += 1;
            calls < 3
        })
        .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(id.len(), ID_LEN);
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let err = generate_unique_id(|_| true).unwrap_err();
        assert!(matches!(err, IdError::Exhausted(MAX_ID_ATTEMPTS)));
    }

    #[test]
    fn unique_under_concurrency() {
        let taken = Arc::new(Mutex::new(HashSet::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let taken = Arc::clone(&taken);
                std::thread::spawn(move || {
                    for _ in 0..125 {
                        let mut set = taken.lock().unwrap();
                        let id = generate_unique_id(|id| set.contains(id)).unwrap();
                        assert!(set.insert(id));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(taken.lock().unwrap().len(), 1000);
    }
}
