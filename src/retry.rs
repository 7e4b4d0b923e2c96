/// Retry an async results-store operation a few times before giving up.
/// Transient connection drops are the usual culprit; anything still failing
/// after the last attempt propagates to the caller.
macro_rules! retry_store_operation {
    ($context:expr, $operation:expr) => {{
        const MAX_ATTEMPTS: u32 = 3;
        const RETRY_DELAY_SECS: u64 = 2;

        let context_value: String = $context.into();
        let mut attempt = 1;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err) if attempt >= MAX_ATTEMPTS => break Err(err),
                Err(err) => {
                    log::warn!(
                        "Attempt {}/{} at {} failed: {}. Retrying in {}s.",
                        attempt,
                        MAX_ATTEMPTS,
                        context_value,
                        err,
                        RETRY_DELAY_SECS
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(RETRY_DELAY_SECS)).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_store_operation;
