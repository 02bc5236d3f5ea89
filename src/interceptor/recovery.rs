//! Panic recovery.
//!
//! A panic in anything inside this interceptor becomes the business `FAIL`
//! error (`INTERNAL` with a structured detail). The panic never crosses it,
//! so outer interceptors and the connection task only ever see an error.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::FutureExt;
use tonic::Status;

use crate::interceptor::{Interceptor, Next};
use crate::rpc::status::FAIL;
use crate::rpc::CallContext;

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryInterceptor;

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[async_trait]
impl<Req, Res> Interceptor<Req, Res> for RecoveryInterceptor
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn name(&self) -> &'static str {
        "recovery"
    }

    async fn intercept(
        &self,
        ctx: CallContext,
        req: Req,
        next: Next<Req, Res>,
    ) -> Result<Res, Status> {
        let method = ctx.method().to_owned();
        // The async block also catches a handler that panics before returning its future.
        match AssertUnwindSafe(async move { next.call(ctx, req).await })
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let backtrace = Backtrace::force_capture();
                tracing::error!(
                    method = %method,
                    panic = %panic_message(payload.as_ref()),
                    backtrace = %backtrace,
                    "Recovered from panic in call"
                );
                Err(FAIL.to_status())
            }
        }
    }
}
