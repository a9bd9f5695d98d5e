//! A [PostProcessWorker] owns a non-reentrant post-processing step on a
//! dedicated thread.
//!
//! Legacy post-processing operations are not guaranteed reentrant, so the
//! worker accepts requests over a channel and applies them strictly one at a
//! time.  Taking `&mut self` in [PostProcess::apply] makes the one-at-a-time
//! constraint part of the signature instead of a mutex buried in a cache.
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;

use crate::object::ObjectRef;

/// A single-input, single-output transform applied to freshly decoded
/// objects.
pub trait PostProcess: Send + 'static {
    fn apply(
        &mut self,
        object: ObjectRef,
    ) -> std::result::Result<ObjectRef, Box<dyn std::error::Error + Send + Sync>>;
}

struct Request {
    object: ObjectRef,
    reply: mpsc::SyncSender<std::result::Result<ObjectRef, String>>,
}

/// Handle to the worker thread.  Dropping the handle shuts the worker down.
pub struct PostProcessWorker {
    sender: Mutex<mpsc::Sender<Request>>,
}

impl PostProcessWorker {
    pub fn spawn(mut step: Box<dyn PostProcess>) -> PostProcessWorker {
        let (sender, receiver) = mpsc::channel::<Request>();
        thread::Builder::new()
            .name("post-process".to_string())
            .spawn(move || {
                while let Ok(request) = receiver.recv() {
                    let result = step
                        .apply(request.object)
                        .map_err(|e| e.to_string());
                    // A caller that gave up waiting is not an error here.
                    let _ = request.reply.send(result);
                }
            })
            .expect("failed to spawn the post-process worker thread");
        PostProcessWorker {
            sender: Mutex::new(sender),
        }
    }

    /// Apply the step to `object`, blocking until the worker gets to it.
    /// The error is the step's rendered failure reason.
    pub fn apply(&self, object: ObjectRef) -> std::result::Result<ObjectRef, String> {
        let (reply, response) = mpsc::sync_channel(1);
        self.sender
            .lock()
            .unwrap()
            .send(Request { object, reply })
            .map_err(|_| "post-process worker has shut down".to_string())?;
        response
            .recv()
            .map_err(|_| "post-process worker has shut down".to_string())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::types::IntData;

    /// Doubles ints, and proves it is never entered concurrently.
    struct Doubler {
        entered: bool,
    }

    impl PostProcess for Doubler {
        fn apply(
            &mut self,
            object: ObjectRef,
        ) -> std::result::Result<ObjectRef, Box<dyn std::error::Error + Send + Sync>> {
            assert!(!self.entered, "post-process step entered reentrantly");
            self.entered = true;
            let value = object
                .as_any()
                .downcast_ref::<IntData>()
                .ok_or("expected IntData")?
                .value;
            std::thread::sleep(std::time::Duration::from_millis(1));
            self.entered = false;
            Ok(Arc::new(IntData::new(value * 2)))
        }
    }

    #[test]
    fn applies_the_step() {
        let worker = PostProcessWorker::spawn(Box::new(Doubler { entered: false }));
        let result = worker.apply(Arc::new(IntData::new(21))).unwrap();
        assert!(result.is_equal_to(&IntData::new(42)));
    }

    #[test]
    fn serializes_concurrent_requests() {
        let worker = Arc::new(PostProcessWorker::spawn(Box::new(Doubler {
            entered: false,
        })));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let worker = worker.clone();
                std::thread::spawn(move || worker.apply(Arc::new(IntData::new(i))).unwrap())
            })
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.join().unwrap();
            assert!(result.is_equal_to(&IntData::new(i as i64 * 2)));
        }
    }

    #[test]
    fn failure_carries_the_reason() {
        let worker = PostProcessWorker::spawn(Box::new(Doubler { entered: false }));
        let err = worker
            .apply(Arc::new(crate::types::StringData::new("not an int")))
            .unwrap_err();
        assert!(err.contains("expected IntData"));
    }
}
