use {
    http_body_util::{BodyExt, Empty as BodyEmpty, Full as BodyFull, combinators::BoxBody},
    hyper::{
        StatusCode,
        body::Bytes,
        header::CONTENT_TYPE,
        http::Result as HttpResult,
    },
    jsonrpsee_types::{ErrorObject, Id, Response, ResponsePayload},
    tracing::error,
};

pub type RpcResponse = hyper::Response<BoxBody<Bytes, std::convert::Infallible>>;

/// Code carried by every gateway-synthesised JSON-RPC error.
pub const INTERNAL_ERROR_CODE: i32 = -32603;

pub fn jsonrpc_response_success(
    id: Id<'static>,
    result: serde_json::Value,
) -> Response<'static, serde_json::Value> {
    Response::new(ResponsePayload::success(result), id)
}

pub fn jsonrpc_response_error(
    id: Id<'static>,
    message: impl Into<String>,
) -> Response<'static, serde_json::Value> {
    let error = ErrorObject::owned(INTERNAL_ERROR_CODE, message.into(), None::<()>);
    Response::new(ResponsePayload::error(error), id)
}

/// Collects the pieces of exactly one HTTP response.
///
/// The status is written once (later writes keep the first value), the body
/// at most once. Writing the status after the body, or the body twice, is a
/// programming error: it is logged on first occurrence and suppressed.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    status: Option<StatusCode>,
    content_type_json: bool,
    body: Option<Bytes>,
    misuse_logged: bool,
}

impl ResponseWriter {
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn write_status(&mut self, status: StatusCode) {
        if self.body.is_some() {
            self.log_misuse("status after body");
            return;
        }
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    pub fn write_envelope(&mut self, response: &Response<'_, serde_json::Value>) {
        let body = serde_json::to_vec(response).expect("json serialization never fail");
        self.write_body(body.into());
    }

    fn write_body(&mut self, body: Bytes) {
        if self.body.is_some() {
            self.log_misuse("body written twice");
            return;
        }
        self.content_type_json = true;
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.body = Some(body);
    }

    pub fn finish(self) -> HttpResult<RpcResponse> {
        let mut builder =
            hyper::Response::builder().status(self.status.unwrap_or(StatusCode::OK));
        if self.content_type_json {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        match self.body {
            Some(body) => builder.body(BodyFull::from(body).boxed()),
            None => builder.body(BodyEmpty::new().boxed()),
        }
    }

    fn log_misuse(&mut self, what: &str) {
        if !self.misuse_logged {
            error!("response writer misuse: {what}");
            self.misuse_logged = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn rendered(response: &Response<'_, serde_json::Value>) -> serde_json::Value {
        serde_json::to_value(response).unwrap()
    }

    #[test]
    fn success_envelope_echoes_ids_opaquely() {
        let by_number = rendered(&jsonrpc_response_success(Id::Number(7), json!("1")));
        assert_eq!(by_number["id"], json!(7));
        assert_eq!(by_number["jsonrpc"], json!("2.0"));
        assert_eq!(by_number["result"], json!("1"));

        let by_str = rendered(&jsonrpc_response_success(Id::Str("abc".into()), json!("1")));
        assert_eq!(by_str["id"], json!("abc"));

        let by_null = rendered(&jsonrpc_response_success(Id::Null, json!("1")));
        assert_eq!(by_null["id"], json!(null));
    }

    #[test]
    fn error_envelope_uses_internal_error_code() {
        let value = rendered(&jsonrpc_response_error(Id::Number(1), "nope"));
        assert_eq!(value["error"]["code"], json!(-32603));
        assert_eq!(value["error"]["message"], json!("nope"));
        assert!(value.get("result").is_none());
    }

    #[test]
    fn first_status_wins() {
        let mut writer = ResponseWriter::default();
        writer.write_status(StatusCode::UNAUTHORIZED);
        writer.write_status(StatusCode::OK);
        let response = writer.finish().unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn second_body_is_suppressed() {
        let mut writer = ResponseWriter::default();
        writer.write_envelope(&jsonrpc_response_success(Id::Number(1), json!("a")));
        writer.write_envelope(&jsonrpc_response_success(Id::Number(1), json!("b")));
        let response = writer.finish().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn status_after_body_is_suppressed() {
        let mut writer = ResponseWriter::default();
        writer.write_envelope(&jsonrpc_response_success(Id::Number(1), json!("a")));
        writer.write_status(StatusCode::INTERNAL_SERVER_ERROR);
        let response = writer.finish().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn empty_policy_response_has_no_content_type() {
        let mut writer = ResponseWriter::default();
        writer.write_status(StatusCode::UNAUTHORIZED);
        let response = writer.finish().unwrap();
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }
}
