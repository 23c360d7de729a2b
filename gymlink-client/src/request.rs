use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{
    api::{
        self, paths, ApiRequest, ApiResponse, CommentNode, LikeToggleResponse, NewComment,
        NewSession, PostId, Transport, User,
    },
    Error, RefreshCoordinator, SessionEventBus,
};

/// Request pipeline that recovers transparently from an expired session
///
/// Credentials travel implicitly with the transport. A 401 on a non-exempt
/// route goes through the `RefreshCoordinator`; every other failure is
/// returned as-is.
pub struct AuthenticatedRequestClient<T> {
    refresh: Arc<RefreshCoordinator<T>>,
}

impl<T> Clone for AuthenticatedRequestClient<T> {
    fn clone(&self) -> Self {
        AuthenticatedRequestClient {
            refresh: self.refresh.clone(),
        }
    }
}

impl<T: Transport> AuthenticatedRequestClient<T> {
    pub fn new(transport: Arc<T>, bus: SessionEventBus) -> AuthenticatedRequestClient<T> {
        AuthenticatedRequestClient {
            refresh: Arc::new(RefreshCoordinator::new(transport, bus)),
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator<T> {
        &self.refresh
    }

    pub async fn execute(&self, req: ApiRequest) -> Result<ApiResponse, Error> {
        let path = req.path.clone();
        let resp = self.refresh.guard(req).await?;
        check_status(&path, resp)
    }

    async fn fetch<R: DeserializeOwned>(&self, req: ApiRequest) -> Result<R, Error> {
        decode(self.execute(req).await?)
    }

    pub async fn get<R: DeserializeOwned>(&self, path: impl Into<String>) -> Result<R, Error> {
        self.fetch(ApiRequest::get(path)).await
    }

    pub async fn post<B, R>(&self, path: impl Into<String>, body: &B) -> Result<R, Error>
    where
        B: serde::Serialize,
        R: DeserializeOwned,
    {
        let req = ApiRequest::post(path)
            .with_json(body)
            .map_err(|e| Error::Encode(e.to_string()))?;
        self.fetch(req).await
    }

    pub async fn login(&self, session: &NewSession) -> Result<User, Error> {
        session.validate()?;
        let user: User = self.post(paths::LOGIN, session).await?;
        tracing::info!(user = %user.name, "logged in");
        Ok(user)
    }

    pub async fn logout(&self) -> Result<(), Error> {
        self.execute(ApiRequest::post(paths::LOGOUT)).await?;
        Ok(())
    }

    /// Identity check, `None` when there is no session
    pub async fn whoami(&self) -> Result<Option<User>, Error> {
        match self.get(paths::WHOAMI).await {
            Ok(user) => Ok(Some(user)),
            Err(Error::Unauthorized) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn fetch_comments(&self, post: &PostId) -> Result<Vec<CommentNode>, Error> {
        self.get(paths::comments(post)).await
    }

    pub async fn create_comment(
        &self,
        post: &PostId,
        comment: &NewComment,
    ) -> Result<CommentNode, Error> {
        comment.validate()?;
        self.post(paths::comments(post), comment).await
    }

    pub async fn fetch_like(&self, post: &PostId) -> Result<LikeToggleResponse, Error> {
        self.get(paths::like(post)).await
    }

    pub async fn toggle_like(&self, post: &PostId) -> Result<LikeToggleResponse, Error> {
        self.fetch(ApiRequest::post(paths::like(post))).await
    }
}

fn check_status(path: &str, resp: ApiResponse) -> Result<ApiResponse, Error> {
    if resp.status.is_success() {
        return Ok(resp);
    }
    if resp.status == http::StatusCode::UNAUTHORIZED {
        return Err(Error::Unauthorized);
    }
    let err = api::Error::parse(&resp.body).unwrap_or_else(|err| {
        tracing::warn!(?err, %path, status = %resp.status, "server error response is not parseable");
        api::Error::Unknown(format!("server answered {}", resp.status))
    });
    tracing::debug!(%path, %err, "server returned an error");
    Err(Error::Api(err))
}

fn decode<R: DeserializeOwned>(resp: ApiResponse) -> Result<R, Error> {
    // the server returns an empty body for unit answers, which does not parse as json
    let body: &[u8] = match resp.body.is_empty() {
        true => b"null",
        false => &resp.body,
    };
    serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;

    #[test]
    fn conflict_is_surfaced_verbatim() {
        let body = api::Error::Conflict(String::from("slot taken")).contents();
        assert_eq!(
            check_status("/api/bookings", ApiResponse::new(StatusCode::CONFLICT, body)),
            Err(Error::Api(api::Error::Conflict(String::from("slot taken"))))
        );
    }

    #[test]
    fn unparseable_error_becomes_unknown() {
        let resp = ApiResponse::new(StatusCode::BAD_GATEWAY, b"<html>".to_vec());
        assert!(matches!(
            check_status("/x", resp),
            Err(Error::Api(api::Error::Unknown(_)))
        ));
    }

    #[test]
    fn terminal_unauthorized() {
        let resp = ApiResponse::new(StatusCode::UNAUTHORIZED, Vec::new());
        assert_eq!(check_status("/x", resp), Err(Error::Unauthorized));
    }

    #[test]
    fn empty_body_decodes_as_unit() {
        let () = decode(ApiResponse::new(StatusCode::OK, Vec::new())).unwrap();
        let r: Result<LikeToggleResponse, _> = decode(ApiResponse::new(StatusCode::OK, b"{".to_vec()));
        assert!(matches!(r, Err(Error::Decode(_))));
    }
}
