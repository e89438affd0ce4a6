#![forbid(unsafe_code)]

//! Settle-all aggregation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;

/// Wait for every future to settle, then report all outcomes in input order.
///
/// Unlike a fail-fast join, a failing input never cuts the wait short: the
/// aggregate settles only after every input has. It is `Err` when any input
/// failed, carrying the outcomes of all inputs either way.
///
/// ```rust
/// use futures::executor::block_on;
/// use futures::future::ready;
/// use xe_form::await_all;
///
/// let settled = block_on(await_all(vec![
///     ready(Ok::<u32, u32>(1)),
///     ready(Err(2)),
///     ready(Ok(3)),
/// ]));
/// assert_eq!(settled, Err(vec![1, 2, 3]));
/// ```
pub async fn await_all<I, F, T>(futures: I) -> Result<Vec<T>, Vec<T>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, T>>,
{
    let has_error = AtomicBool::new(false);
    let has_error = &has_error;
    let outcomes = join_all(futures.into_iter().map(|future| async move {
        future.await.unwrap_or_else(|failure| {
            has_error.store(true, Ordering::SeqCst);
            failure
        })
    }))
    .await;

    if has_error.load(Ordering::SeqCst) {
        Err(outcomes)
    } else {
        Ok(outcomes)
    }
}
