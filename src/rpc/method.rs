//! Server-side method table and dispatch.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tonic::server::{Grpc, UnaryService};
use tonic::Status;

use crate::interceptor::{
    AccessLogInterceptor, ErrorLogInterceptor, Handler, InterceptorChain, RecoveryInterceptor,
    TimeoutInterceptor, TracingInterceptor,
};
use crate::observability::Tracer;
use crate::rpc::CallContext;

/// Builds the server chain for each registered method.
#[derive(Debug, Clone)]
pub struct ServerInterceptors {
    tracer: Arc<dyn Tracer>,
    handler_timeout: Duration,
}

impl ServerInterceptors {
    pub fn new(tracer: Arc<dyn Tracer>, handler_timeout: Duration) -> Self {
        Self {
            tracer,
            handler_timeout,
        }
    }

    /// access log → error log → tracing → timeout → recovery
    pub fn chain<Req, Res>(&self) -> InterceptorChain<Req, Res>
    where
        Req: Send + 'static,
        Res: Send + 'static,
    {
        InterceptorChain::new()
            .push(AccessLogInterceptor)
            .push(ErrorLogInterceptor)
            .push(TracingInterceptor::server(Arc::clone(&self.tracer)))
            .push(TimeoutInterceptor::new(self.handler_timeout))
            .push(RecoveryInterceptor)
    }
}

/// A unary method with its composed pipeline.
pub struct UnaryMethod<Req, Res> {
    path: &'static str,
    handler: Handler<Req, Res>,
}

impl<Req, Res> UnaryMethod<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub fn new(path: &'static str, handler: Handler<Req, Res>) -> Self {
        Self { path, handler }
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    /// Run the full pipeline in-process.
    pub async fn call(&self, ctx: CallContext, req: Req) -> Result<Res, Status> {
        self.handler.call(ctx, req).await
    }
}

impl<Req, Res> std::fmt::Debug for UnaryMethod<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnaryMethod").field("path", &self.path).finish()
    }
}

/// Type-erased view of a registered method, used by the gRPC dispatcher.
pub trait RpcMethod: Send + Sync + 'static {
    fn path(&self) -> &'static str;

    /// Decode a gRPC request, run the pipeline and encode the response.
    fn serve(
        &self,
        request: http::Request<axum::body::Body>,
    ) -> BoxFuture<'static, http::Response<tonic::body::Body>>;

    fn as_any(&self) -> &dyn Any;
}

struct UnaryAdapter<Req, Res> {
    path: &'static str,
    handler: Handler<Req, Res>,
}

impl<Req, Res> UnaryService<Req> for UnaryAdapter<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    type Response = Res;
    type Future = BoxFuture<'static, Result<tonic::Response<Res>, Status>>;

    fn call(&mut self, request: tonic::Request<Req>) -> Self::Future {
        let handler = self.handler.clone();
        let path = self.path;
        Box::pin(async move {
            let (metadata, _extensions, message) = request.into_parts();
            let ctx = CallContext::from_metadata(path, metadata);
            handler.call(ctx, message).await.map(tonic::Response::new)
        })
    }
}

impl<Req, Res> RpcMethod for UnaryMethod<Req, Res>
where
    Req: prost::Message + Default + Send + 'static,
    Res: prost::Message + Send + 'static,
{
    fn path(&self) -> &'static str {
        self.path
    }

    fn serve(
        &self,
        request: http::Request<axum::body::Body>,
    ) -> BoxFuture<'static, http::Response<tonic::body::Body>> {
        let adapter = UnaryAdapter {
            path: self.path,
            handler: self.handler.clone(),
        };
        Box::pin(async move {
            let codec = tonic_prost::ProstCodec::<Res, Req>::default();
            let mut grpc = Grpc::new(codec);
            grpc.unary(adapter, request).await
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registered methods keyed by full path (`/package.Service/Method`).
pub struct MethodTable {
    methods: HashMap<&'static str, Arc<dyn RpcMethod>>,
}

impl MethodTable {
    pub fn builder(interceptors: ServerInterceptors) -> MethodTableBuilder {
        MethodTableBuilder {
            interceptors,
            methods: HashMap::new(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&Arc<dyn RpcMethod>> {
        self.methods.get(path)
    }

    /// Typed lookup; `None` if the path is unknown or registered with other types.
    pub fn unary<Req, Res>(&self, path: &str) -> Option<&UnaryMethod<Req, Res>>
    where
        Req: 'static,
        Res: 'static,
    {
        self.methods
            .get(path)?
            .as_any()
            .downcast_ref::<UnaryMethod<Req, Res>>()
    }

    pub fn paths(&self) -> Vec<&'static str> {
        let mut paths: Vec<_> = self.methods.keys().copied().collect();
        paths.sort_unstable();
        paths
    }
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.paths())
            .finish()
    }
}

pub struct MethodTableBuilder {
    interceptors: ServerInterceptors,
    methods: HashMap<&'static str, Arc<dyn RpcMethod>>,
}

impl MethodTableBuilder {
    /// Register a unary handler; it is wrapped in the server chain here.
    pub fn unary<Req, Res>(mut self, path: &'static str, handler: Handler<Req, Res>) -> Self
    where
        Req: prost::Message + Default + Send + 'static,
        Res: prost::Message + Send + 'static,
    {
        let composed = self.interceptors.chain::<Req, Res>().build(handler);
        if self
            .methods
            .insert(path, Arc::new(UnaryMethod::new(path, composed)))
            .is_some()
        {
            tracing::warn!(path, "Method registered twice, keeping the latest");
        }
        self
    }

    pub fn build(self) -> MethodTable {
        tracing::debug!(methods = self.methods.len(), "Method table built");
        MethodTable {
            methods: self.methods,
        }
    }
}

/// gRPC dispatcher over a method table.
#[derive(Debug, Clone)]
pub struct RpcServer {
    table: Arc<MethodTable>,
}

impl RpcServer {
    pub fn new(table: Arc<MethodTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<MethodTable> {
        &self.table
    }

    pub async fn handle(
        &self,
        request: http::Request<axum::body::Body>,
    ) -> http::Response<tonic::body::Body> {
        match self.table.get(request.uri().path()) {
            Some(method) => method.serve(request).await,
            None => {
                tracing::debug!(path = %request.uri().path(), "Unknown gRPC method");
                unimplemented()
            }
        }
    }
}

/// Trailers-only `UNIMPLEMENTED` response.
fn unimplemented() -> http::Response<tonic::body::Body> {
    let mut response = http::Response::new(tonic::body::Body::default());
    let headers = response.headers_mut();
    headers.insert(Status::GRPC_STATUS, (tonic::Code::Unimplemented as i32).into());
    headers.insert(
        http::header::CONTENT_TYPE,
        tonic::metadata::GRPC_CONTENT_TYPE,
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NoopTracer;

    fn table() -> MethodTable {
        MethodTable::builder(ServerInterceptors::new(
            Arc::new(NoopTracer),
            Duration::from_secs(1),
        ))
        .unary(
            "/test.Echo/Echo",
            Handler::from_fn(|_ctx, req: String| async move { Ok(format!("echo {req}")) }),
        )
        .unary(
            "/test.Echo/Panic",
            Handler::from_fn(|_ctx, _req: String| async move {
                if true {
                    panic!("handler bug");
                }
                Ok::<String, Status>(String::new())
            }),
        )
        .build()
    }

    #[tokio::test]
    async fn typed_lookup_runs_the_composed_pipeline() {
        let table = table();
        assert_eq!(table.paths(), vec!["/test.Echo/Echo", "/test.Echo/Panic"]);

        let echo = table.unary::<String, String>("/test.Echo/Echo").unwrap();
        let res = echo.call(CallContext::new(echo.path()), "hi".into()).await.unwrap();
        assert_eq!(res, "echo hi");

        // Recovery is part of every registered pipeline.
        let panicky = table.unary::<String, String>("/test.Echo/Panic").unwrap();
        let err = panicky
            .call(CallContext::new(panicky.path()), String::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Internal);
    }

    #[test]
    fn typed_lookup_rejects_wrong_types() {
        let table = table();
        assert!(table.unary::<u32, String>("/test.Echo/Echo").is_none());
        assert!(table.unary::<String, String>("/test.Echo/Missing").is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_unimplemented() {
        let server = RpcServer::new(Arc::new(table()));
        let request = http::Request::builder()
            .uri("/test.Echo/Nope")
            .header("content-type", "application/grpc")
            .body(axum::body::Body::empty())
            .unwrap();

        let response = server.handle(request).await;
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(response.headers()["grpc-status"], "12");
    }
}
