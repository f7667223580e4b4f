use busbar_sf_client::security::{soql, url as url_security};
use busbar_sf_client::{RequestMethod, Response};
use serde_json::{json, Map, Value as JsonValue};
use tracing::{instrument, warn};

use super::RecordOutcome;
use crate::collections::{CollectionRequest, CollectionResult, MAX_COLLECTION_RECORDS};
use crate::error::{Error, ErrorKind, Result};

const COLLECTIONS_PATH: &str = "composite/sobjects";

impl super::SalesforceConnection {
    /// Create records through SObject Collections, 200 per request.
    ///
    /// Outcomes are in the order of `records`.
    #[instrument(skip(self, records), fields(alias = %self.config.alias, count = records.len()))]
    pub async fn insert_collection(
        &self,
        sobject: &str,
        records: &[Map<String, JsonValue>],
        all_or_none: bool,
    ) -> Result<Vec<RecordOutcome>> {
        check_sobject(sobject)?;
        let records = records
            .iter()
            .map(|fields| {
                let mut record = fields.clone();
                record.insert("attributes".to_string(), json!({"type": sobject}));
                JsonValue::Object(record)
            })
            .collect::<Vec<_>>();
        self.send_collection(RequestMethod::Post, records, all_or_none)
            .await
    }

    /// Update records through SObject Collections, 200 per request.
    #[instrument(skip(self, records), fields(alias = %self.config.alias, count = records.len()))]
    pub async fn update_collection(
        &self,
        sobject: &str,
        records: &[(String, Map<String, JsonValue>)],
        all_or_none: bool,
    ) -> Result<Vec<RecordOutcome>> {
        check_sobject(sobject)?;
        let mut body = Vec::with_capacity(records.len());
        for (id, fields) in records {
            check_id(id)?;
            let mut record = fields.clone();
            record.insert("attributes".to_string(), json!({"type": sobject}));
            record.insert("Id".to_string(), json!(id));
            body.push(JsonValue::Object(record));
        }
        self.send_collection(RequestMethod::Patch, body, all_or_none)
            .await
    }

    /// Delete records by ID through SObject Collections, 200 per request.
    ///
    /// Sent with `allOrNone=false`, so an ID that is already gone does not
    /// block the others; it is reported as [`RecordOutcome::AlreadyAbsent`].
    #[instrument(skip(self, ids), fields(alias = %self.config.alias, count = ids.len()))]
    pub async fn delete_collection(&self, ids: &[String]) -> Result<Vec<RecordOutcome>> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_COLLECTION_RECORDS) {
            for id in chunk {
                check_id(id)?;
            }
            let path = format!("{COLLECTIONS_PATH}?ids={}&allOrNone=false", chunk.join(","));
            let results: Vec<CollectionResult> = self
                .request_json(RequestMethod::Delete, &path, None)
                .await?;
            outcomes.extend(self.collection_outcomes(RequestMethod::Delete, &path, results, false)?);
        }
        Ok(outcomes)
    }

    async fn send_collection(
        &self,
        method: RequestMethod,
        records: Vec<JsonValue>,
        all_or_none: bool,
    ) -> Result<Vec<RecordOutcome>> {
        let mut outcomes = Vec::with_capacity(records.len());
        for chunk in records.chunks(MAX_COLLECTION_RECORDS) {
            let request = CollectionRequest {
                all_or_none,
                records: chunk.to_vec(),
            };
            let body = serde_json::to_value(&request)?;
            let results: Vec<CollectionResult> = self
                .request_json(method, COLLECTIONS_PATH, Some(&body))
                .await?;
            if results.len() != chunk.len() {
                return Err(Error::data(format!(
                    "{} results for {} records",
                    results.len(),
                    chunk.len()
                )));
            }
            outcomes.extend(self.collection_outcomes(method, COLLECTIONS_PATH, results, all_or_none)?);
        }
        Ok(outcomes)
    }

    /// Map per-record results to outcomes.
    ///
    /// In an `allOrNone` batch every record but the culprit carries a
    /// rollback placeholder error. The culprit's error is raised as if it
    /// came from a single-record request.
    fn collection_outcomes(
        &self,
        method: RequestMethod,
        path: &str,
        results: Vec<CollectionResult>,
        all_or_none: bool,
    ) -> Result<Vec<RecordOutcome>> {
        if all_or_none && results.iter().any(|r| !r.success) {
            let real: Vec<&CollectionResult> = results
                .iter()
                .filter(|r| !r.success && !r.is_rollback_placeholder())
                .collect();
            let [failed] = real.as_slice() else {
                return Err(Error::internal(format!(
                    "expected one failed record in an allOrNone batch, found {}",
                    real.len()
                )));
            };
            let error = failed
                .first_error()
                .ok_or_else(|| Error::internal("failed record without an error"))?;
            let synthetic = Response::json_body(
                400,
                &json!([{
                    "errorCode": error.status_code,
                    "message": error.message,
                    "fields": error.fields,
                }]),
            );
            self.raise_errors(method, path, &synthetic)?;
            return Err(Error::internal("allOrNone batch failed without an error"));
        }

        Ok(results
            .into_iter()
            .map(|result| {
                if result.success {
                    return RecordOutcome::Written { id: result.id };
                }
                let error = result.errors.into_iter().next();
                let error_code = error
                    .as_ref()
                    .map(|e| e.status_code.clone())
                    .unwrap_or_default();
                if method == RequestMethod::Delete && self.config.is_noop_delete_code(&error_code) {
                    warn!(id = ?result.id, %error_code, "Record to delete does not exist, ignoring");
                    return RecordOutcome::AlreadyAbsent {
                        id: result.id.unwrap_or_default(),
                        error_code,
                    };
                }
                let (message, fields) = error.map(|e| (e.message, e.fields)).unwrap_or_default();
                warn!(id = ?result.id, %error_code, %message, "Record failed");
                RecordOutcome::Failed {
                    reference: result.id,
                    error_code,
                    message,
                    fields,
                }
            })
            .collect())
    }
}

pub(crate) fn check_sobject(sobject: &str) -> Result<()> {
    if soql::is_safe_sobject_name(sobject) {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::Query(format!(
            "Invalid SObject name: {sobject:?}"
        ))))
    }
}

pub(crate) fn check_id(id: &str) -> Result<()> {
    if url_security::is_valid_salesforce_id(id) {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::Query(format!(
            "Invalid Salesforce ID: {id:?}"
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::test_support::{connection, mount_json};
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn record(last_name: &str) -> Map<String, JsonValue> {
        let mut map = Map::new();
        map.insert("LastName".to_string(), json!(last_name));
        map
    }

    #[tokio::test]
    async fn test_insert_collection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/data/v62.0/composite/sobjects"))
            .and(body_partial_json(json!({
                "allOrNone": false,
                "records": [
                    {"attributes": {"type": "Contact"}, "LastName": "Doe"},
                    {"attributes": {"type": "Contact"}, "LastName": "Roe"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "003000000000001AAA", "success": true, "errors": []},
                {"id": "003000000000002AAA", "success": true, "errors": []}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let (conn, _) = connection(&server, Default::default());
        let outcomes = conn
            .insert_collection("Contact", &[record("Doe"), record("Roe")], false)
            .await
            .unwrap();
        assert_eq!(
            outcomes,
            vec![
                RecordOutcome::Written {
                    id: Some("003000000000001AAA".into())
                },
                RecordOutcome::Written {
                    id: Some("003000000000002AAA".into())
                },
            ]
        );
    }

    /// One successful result per record, with the record's `LastName`
    /// standing in for its ID.
    fn echo_last_names(request: &Request) -> ResponseTemplate {
        let body: JsonValue = request.body_json().unwrap_or_default();
        let results: Vec<JsonValue> = body["records"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|r| json!({"id": r["LastName"], "success": true, "errors": []}))
            .collect();
        ResponseTemplate::new(200).set_body_json(results)
    }

    fn contact_id(i: usize) -> String {
        format!("003{i:012}AAA")
    }

    #[tokio::test]
    async fn test_insert_collection_chunks_by_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/data/v62.0/composite/sobjects"))
            .respond_with(echo_last_names)
            .expect(2)
            .mount(&server)
            .await;

        let (conn, _) = connection(&server, Default::default());
        let records: Vec<_> = (0..250).map(|i| record(&format!("Doe{i}"))).collect();
        let outcomes = conn.insert_collection("Contact", &records, false).await.unwrap();

        let expected: Vec<_> = (0..250)
            .map(|i| RecordOutcome::Written {
                id: Some(format!("Doe{i}")),
            })
            .collect();
        assert_eq!(outcomes, expected);

        let requests = server.received_requests().await.unwrap();
        let sizes: Vec<usize> = requests
            .iter()
            .map(|r| r.body_json::<JsonValue>().unwrap()["records"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes, [200, 50]);
        let second: JsonValue = requests[1].body_json().unwrap();
        assert_eq!(second["records"][0]["LastName"], "Doe200");
    }

    #[tokio::test]
    async fn test_delete_collection_chunks_by_200() {
        let server = MockServer::start().await;
        let gone = contact_id(210);
        let responder = {
            let gone = gone.clone();
            move |request: &Request| {
                let ids = request
                    .url
                    .query_pairs()
                    .find(|(key, _)| key == "ids")
                    .map(|(_, value)| value.into_owned())
                    .unwrap_or_default();
                let results: Vec<JsonValue> = ids
                    .split(',')
                    .map(|id| {
                        if id == gone {
                            json!({"id": id, "success": false, "errors": [
                                {"statusCode": "ENTITY_IS_DELETED", "message": "entity is deleted", "fields": []}
                            ]})
                        } else {
                            json!({"id": id, "success": true, "errors": []})
                        }
                    })
                    .collect();
                ResponseTemplate::new(200).set_body_json(results)
            }
        };
        Mock::given(method("DELETE"))
            .and(path("/services/data/v62.0/composite/sobjects"))
            .and(query_param("allOrNone", "false"))
            .respond_with(responder)
            .expect(2)
            .mount(&server)
            .await;

        let (conn, _) = connection(&server, Default::default());
        let ids: Vec<String> = (0..230).map(contact_id).collect();
        let outcomes = conn.delete_collection(&ids).await.unwrap();
        assert_eq!(outcomes.len(), 230);
        assert_eq!(outcomes.iter().filter(|o| o.is_written()).count(), 229);
        assert_eq!(
            outcomes[210],
            RecordOutcome::AlreadyAbsent {
                id: gone,
                error_code: "ENTITY_IS_DELETED".into(),
            }
        );
        assert_eq!(
            outcomes[229],
            RecordOutcome::Written {
                id: Some(contact_id(229))
            }
        );

        let requests = server.received_requests().await.unwrap();
        let sent_ids: Vec<String> = requests
            .iter()
            .map(|r| {
                r.url
                    .query_pairs()
                    .find(|(key, _)| key == "ids")
                    .map(|(_, value)| value.into_owned())
                    .unwrap_or_default()
            })
            .collect();
        assert_eq!(sent_ids[0].split(',').count(), 200);
        assert_eq!(sent_ids[1].split(',').next(), Some(contact_id(200).as_str()));
        assert_eq!(sent_ids[1].split(',').count(), 30);
    }

    #[tokio::test]
    async fn test_all_or_none_failure_in_a_later_chunk() {
        let server = MockServer::start().await;
        let ok: Vec<JsonValue> = (0..200)
            .map(|i| json!({"id": contact_id(i), "success": true, "errors": []}))
            .collect();
        Mock::given(method("POST"))
            .and(path("/services/data/v62.0/composite/sobjects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(JsonValue::Array(ok)))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        let mut rest: Vec<JsonValue> = (0..48)
            .map(|_| {
                json!({"id": null, "success": false, "errors": [
                    {"statusCode": "ALL_OR_NONE_OPERATION_ROLLED_BACK", "message": "Record rolled back"}
                ]})
            })
            .collect();
        rest.push(json!({"id": null, "success": false, "errors": [
            {"statusCode": "REQUIRED_FIELD_MISSING", "message": "Required fields are missing: [LastName]"}
        ]}));
        rest.push(json!({"id": null, "success": false, "errors": [
            {"statusCode": "STRING_TOO_LONG", "message": "LastName: data value too large"}
        ]}));
        Mock::given(method("POST"))
            .and(path("/services/data/v62.0/composite/sobjects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(JsonValue::Array(rest)))
            .expect(1)
            .mount(&server)
            .await;

        let (conn, _) = connection(&server, Default::default());
        let records: Vec<_> = (0..250).map(|i| record(&format!("Doe{i}"))).collect();
        let err = conn
            .insert_collection("Contact", &records, true)
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Internal(_)));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_without_all_or_none() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "PATCH",
            "/services/data/v62.0/composite/sobjects",
            200,
            json!([
                {"id": "003000000000001AAA", "success": true, "errors": []},
                {"id": "003000000000002AAA", "success": false, "errors": [
                    {"statusCode": "FIELD_CUSTOM_VALIDATION_EXCEPTION", "message": "Phone required", "fields": ["Phone"]}
                ]}
            ]),
        )
        .await;

        let (conn, _) = connection(&server, Default::default());
        let outcomes = conn
            .update_collection(
                "Contact",
                &[
                    ("003000000000001AAA".to_string(), record("Doe")),
                    ("003000000000002AAA".to_string(), record("Roe")),
                ],
                false,
            )
            .await
            .unwrap();
        assert!(outcomes[0].is_written());
        assert_eq!(
            outcomes[1],
            RecordOutcome::Failed {
                reference: Some("003000000000002AAA".into()),
                error_code: "FIELD_CUSTOM_VALIDATION_EXCEPTION".into(),
                message: "Phone required".into(),
                fields: vec!["Phone".into()],
            }
        );
    }

    #[tokio::test]
    async fn test_all_or_none_raises_the_real_failure() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "POST",
            "/services/data/v62.0/composite/sobjects",
            200,
            json!([
                {"id": null, "success": false, "errors": [
                    {"statusCode": "ALL_OR_NONE_OPERATION_ROLLED_BACK", "message": "Record rolled back because not all records were valid and the request was using AllOrNone header"}
                ]},
                {"id": null, "success": false, "errors": [
                    {"statusCode": "REQUIRED_FIELD_MISSING", "message": "Required fields are missing: [LastName]", "fields": ["LastName"]}
                ]}
            ]),
        )
        .await;

        let (conn, _) = connection(&server, Default::default());
        let err = conn
            .insert_collection("Contact", &[record("Doe"), Map::new()], true)
            .await
            .unwrap_err();
        match err.kind {
            ErrorKind::Salesforce {
                error_code, fields, ..
            } => {
                assert_eq!(error_code, "REQUIRED_FIELD_MISSING");
                assert_eq!(fields, vec!["LastName"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_all_or_none_with_two_real_failures_is_internal() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "POST",
            "/services/data/v62.0/composite/sobjects",
            200,
            json!([
                {"id": null, "success": false, "errors": [{"statusCode": "REQUIRED_FIELD_MISSING", "message": "a"}]},
                {"id": null, "success": false, "errors": [{"statusCode": "STRING_TOO_LONG", "message": "b"}]}
            ]),
        )
        .await;

        let (conn, _) = connection(&server, Default::default());
        let err = conn
            .insert_collection("Contact", &[Map::new(), Map::new()], true)
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Internal(_)));
    }

    #[tokio::test]
    async fn test_delete_collection_already_deleted() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/services/data/v62.0/composite/sobjects"))
            .and(query_param("ids", "003000000000001AAA,003000000000002AAA"))
            .and(query_param("allOrNone", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "003000000000001AAA", "success": true, "errors": []},
                {"id": "003000000000002AAA", "success": false, "errors": [
                    {"statusCode": "ENTITY_IS_DELETED", "message": "entity is deleted", "fields": []}
                ]}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let (conn, _) = connection(&server, DatabaseConfig::default());
        let outcomes = conn
            .delete_collection(&["003000000000001AAA".into(), "003000000000002AAA".into()])
            .await
            .unwrap();
        assert!(outcomes[0].is_written());
        assert_eq!(
            outcomes[1],
            RecordOutcome::AlreadyAbsent {
                id: "003000000000002AAA".into(),
                error_code: "ENTITY_IS_DELETED".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_names_before_sending() {
        let server = MockServer::start().await;
        let (conn, auth) = connection(&server, Default::default());
        let err = conn
            .insert_collection("Contact; DROP", &[record("Doe")], false)
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Query(_)));
        let err = conn.delete_collection(&["not-an-id".into()]).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Query(_)));
        assert_eq!(auth.calls(), 0);
    }
}
