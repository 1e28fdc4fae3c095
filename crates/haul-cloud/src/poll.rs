use crate::{CloudError, ImageAdapter};
use haul_core::PollPolicy;
use std::time::Instant;
use tracing::debug;

/// Poll an image until it reaches `target`, bounded by the policy's
/// interval and deadline. Exceeding the deadline is a timeout error, never
/// an endless loop.
pub fn wait_for_image_status(
    image: &dyn ImageAdapter,
    image_id: &str,
    target: &str,
    policy: &PollPolicy,
) -> Result<(), CloudError> {
    let started = Instant::now();
    loop {
        let current = image.status(image_id)?;
        if current.eq_ignore_ascii_case(target) {
            return Ok(());
        }
        let waited = started.elapsed();
        if waited + policy.interval > policy.max_wait {
            return Err(CloudError::StatusTimeout {
                resource: format!("image {image_id}"),
                status: target.to_string(),
                waited,
            });
        }
        debug!(image_id, current, target, "waiting for image status");
        std::thread::sleep(policy.interval);
    }
}
