//! Per-request unit of work.
//!
//! Routes layered with [`unit_of_work_middleware`] run their handler against
//! one transaction: committed when the response is a success, rolled back
//! (per the route's [`UnitOfWork`] options) when the handler failed.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use service_core::error::{AppError, HandlerFailure};
use std::convert::Infallible;
use std::ops::Deref;
use std::sync::Arc;

use crate::{
    services::{DataSource, ServiceError, Session, UnitOfWork},
    AppState,
};

#[derive(Clone)]
pub struct UnitOfWorkState {
    pub data: Arc<dyn DataSource>,
    pub options: UnitOfWork,
}

impl UnitOfWorkState {
    pub fn new(data: Arc<dyn DataSource>, options: UnitOfWork) -> Self {
        Self { data, options }
    }
}

/// The session a handler should use for storage access.
///
/// Inside a unit of work this is the request's transaction; elsewhere it is
/// an autocommit session.
#[derive(Clone)]
pub struct DbSession(pub Arc<dyn Session>);

impl Deref for DbSession {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for DbSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<DbSession>()
            .cloned()
            .unwrap_or_else(|| DbSession(state.data.session())))
    }
}

/// A handler response that counts as a failure for the unit of work.
struct FailedResponse(Response);

impl From<ServiceError> for FailedResponse {
    fn from(err: ServiceError) -> Self {
        FailedResponse(AppError::from(err).into_response())
    }
}

fn is_failure(response: &Response) -> bool {
    response.extensions().get::<HandlerFailure>().is_some() || response.status().is_server_error()
}

pub async fn unit_of_work_middleware(
    State(uow): State<UnitOfWorkState>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let result = uow
        .options
        .execute(uow.data.as_ref(), |session| async move {
            let mut req = req;
            req.extensions_mut().insert(DbSession(session));

            let response = next.run(req).await;
            if is_failure(&response) {
                Err(FailedResponse(response))
            } else {
                Ok(response)
            }
        })
        .await;

    match result {
        Ok(response) => response,
        Err(FailedResponse(response)) => {
            tracing::debug!(
                %method,
                path = %path,
                status = %response.status(),
                "Request failed inside unit of work"
            );
            response
        }
    }
}
