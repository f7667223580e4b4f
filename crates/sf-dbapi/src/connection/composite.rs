use busbar_sf_client::{RequestMethod, Response};
use serde_json::Value as JsonValue;
use tracing::{instrument, warn};

use super::RecordOutcome;
use crate::collections::ROLLBACK_PLACEHOLDER_CODES;
use crate::composite::{
    CompositeRequest, CompositeResponse, CompositeSubrequest, CompositeSubresponse,
    MAX_COMPOSITE_SUBREQUESTS,
};
use crate::error::{Error, Result};

impl super::SalesforceConnection {
    /// Build a composite subrequest for a REST path relative to the
    /// versioned root.
    pub fn subrequest(
        &self,
        method: RequestMethod,
        path: &str,
        reference_id: impl Into<String>,
        body: Option<JsonValue>,
    ) -> CompositeSubrequest {
        CompositeSubrequest {
            method: method.as_str().to_string(),
            url: self.relative_url(path),
            reference_id: reference_id.into(),
            body,
        }
    }

    /// Send subrequests through the Composite API, 25 per request.
    ///
    /// Outcomes are in the order of `subrequests`.
    #[instrument(skip(self, subrequests), fields(alias = %self.config.alias, count = subrequests.len()))]
    pub async fn composite(
        &self,
        subrequests: &[CompositeSubrequest],
        all_or_none: bool,
    ) -> Result<Vec<RecordOutcome>> {
        let mut outcomes = Vec::with_capacity(subrequests.len());
        for chunk in subrequests.chunks(MAX_COMPOSITE_SUBREQUESTS) {
            let request = CompositeRequest {
                all_or_none,
                subrequests: chunk.to_vec(),
            };
            let body = serde_json::to_value(&request)?;
            let response: CompositeResponse = self
                .request_json(RequestMethod::Post, "composite", Some(&body))
                .await?;
            if response.responses.len() != chunk.len() {
                return Err(Error::data(format!(
                    "{} subresponses for {} subrequests",
                    response.responses.len(),
                    chunk.len()
                )));
            }
            outcomes.extend(self.composite_outcomes(chunk, response.responses, all_or_none)?);
        }
        Ok(outcomes)
    }

    /// Map subresponses to outcomes.
    ///
    /// Under `allOrNone` the one subrequest that really failed is rebuilt
    /// into a standalone response and raised like a single request would be.
    fn composite_outcomes(
        &self,
        subrequests: &[CompositeSubrequest],
        responses: Vec<CompositeSubresponse>,
        all_or_none: bool,
    ) -> Result<Vec<RecordOutcome>> {
        if all_or_none && responses.iter().any(|r| !r.is_success()) {
            let real: Vec<(&CompositeSubrequest, &CompositeSubresponse)> = subrequests
                .iter()
                .zip(&responses)
                .filter(|(_, r)| !r.is_success() && !is_rollback_placeholder(r))
                .collect();
            let [(request, failed)] = real.as_slice() else {
                return Err(Error::internal(format!(
                    "expected one failed subrequest in an allOrNone composite request, found {}",
                    real.len()
                )));
            };
            let method = parse_method(&request.method)?;
            self.raise_errors(method, &request.url, &standalone_response(failed))?;
            return Err(Error::internal(format!(
                "allOrNone composite request rolled back by an ignored error of {} {}",
                request.method, request.url
            )));
        }

        subrequests
            .iter()
            .zip(responses)
            .map(|(request, response)| self.subresponse_outcome(request, response))
            .collect()
    }

    fn subresponse_outcome(
        &self,
        request: &CompositeSubrequest,
        response: CompositeSubresponse,
    ) -> Result<RecordOutcome> {
        if response.is_success() {
            let id = response
                .body
                .get("id")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .unwrap_or(response.reference_id);
            return Ok(RecordOutcome::Written { id: Some(id) });
        }

        let error = response.body.get(0);
        let field = |name: &str| {
            error
                .and_then(|e| e.get(name))
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let error_code = field("errorCode");
        if parse_method(&request.method)? == RequestMethod::Delete
            && response.http_status_code == 404
            && self.config.is_noop_delete_code(&error_code)
        {
            warn!(url = %request.url, %error_code, "Record to delete does not exist, ignoring");
            return Ok(RecordOutcome::AlreadyAbsent {
                id: response.reference_id,
                error_code,
            });
        }

        let message = field("message");
        let fields = error
            .and_then(|e| e.get("fields"))
            .and_then(JsonValue::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        warn!(reference_id = %response.reference_id, %error_code, %message, "Subrequest failed");
        Ok(RecordOutcome::Failed {
            reference: Some(response.reference_id),
            error_code,
            message,
            fields,
        })
    }
}

fn is_rollback_placeholder(response: &CompositeSubresponse) -> bool {
    response.http_status_code == 400
        && response
            .error_code()
            .is_some_and(|code| ROLLBACK_PLACEHOLDER_CODES.contains(&code))
}

/// Rebuild a subresponse as the response its request would have had alone.
/// The error elements get the subrequest's `referenceId`.
fn standalone_response(failed: &CompositeSubresponse) -> Response {
    let mut body = failed.body.clone();
    if let Some(errors) = body.as_array_mut() {
        for error in errors.iter_mut().filter_map(JsonValue::as_object_mut) {
            error.insert(
                "referenceId".to_string(),
                JsonValue::String(failed.reference_id.clone()),
            );
        }
    }
    let mut headers = failed.headers();
    if !headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
    {
        headers.push((
            "Content-Type".to_string(),
            "application/json;charset=UTF-8".to_string(),
        ));
    }
    Response::new(failed.http_status_code, headers, body.to_string())
}

fn parse_method(method: &str) -> Result<RequestMethod> {
    match method {
        "GET" => Ok(RequestMethod::Get),
        "POST" => Ok(RequestMethod::Post),
        "PATCH" => Ok(RequestMethod::Patch),
        "DELETE" => Ok(RequestMethod::Delete),
        other => Err(Error::internal(format!("unexpected subrequest method {other}"))),
    }
}
