use mockall::mock;

use crate::integrations::replicate::{ImageUpscaler, UpscaleOutput, UpscaleRequest, UpstreamError};

mock! {
    pub Upscaler {}
    impl ImageUpscaler for Upscaler {
        async fn upscale(&self, request: &UpscaleRequest) -> Result<UpscaleOutput, UpstreamError>;
    }
}

/// An upscaler that must not be reached.
pub fn unreachable_upscaler() -> MockUpscaler {
    let mut upscaler = MockUpscaler::new();
    upscaler.expect_upscale().never();
    upscaler
}

/// An upscaler that answers `calls` times with a finished job.
pub fn working_upscaler(calls: usize) -> MockUpscaler {
    let mut upscaler = MockUpscaler::new();
    upscaler.expect_upscale().times(calls).returning(|req| {
        Ok(UpscaleOutput { job_id: "job-123".into(), output_url: format!("https://cdn.example.com/out-x{}.png", req.scale) })
    });
    upscaler
}
