//! Authenticated form pipeline: acquire the form service's session cookie,
//! scrape the day's submission payload out of the detail page, validate and
//! transform it, and POST it back.

use std::io::Cursor;

use chrono_tz::Tz;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::config::FormConfig;
use crate::error::PunchError;
use crate::http::{self, SessionClient};
use crate::scrape::{self, Marker, Symbol};

/// Everything needed for one submission: the filled field map plus the two
/// identifiers the submit endpoint takes as query parameters.
#[derive(Debug, Clone)]
pub struct Payload {
    pub form: Vec<(String, String)>,
    pub widget_id: String,
    pub user_id: String,
}

pub struct FormPipeline<'a> {
    client: &'a SessionClient,
    cfg: &'a FormConfig,
    tz: Tz,
    clock: &'a dyn Clock,
    cancel: &'a CancellationToken,
}

impl<'a> FormPipeline<'a> {
    pub fn new(
        client: &'a SessionClient,
        cfg: &'a FormConfig,
        tz: Tz,
        clock: &'a dyn Clock,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            client,
            cfg,
            tz,
            clock,
            cancel,
        }
    }

    /// Acquire the form session, fetch and transform the payload, submit.
    pub async fn run(&self) -> Result<(), PunchError> {
        self.acquire_session().await?;
        let payload = self.fetch_payload().await?;
        self.submit(payload).await
    }

    /// GET the form-list endpoint; the form service answers by issuing its
    /// session cookie. Its absence afterwards is a hard failure; retrying
    /// is the scheduler's job.
    pub async fn acquire_session(&self) -> Result<(), PunchError> {
        self.cancel
            .guard(self.client.http().get(&self.cfg.session_url).send())
            .await??;
        if self.client.jar().by_name(&self.cfg.session_cookie).is_empty() {
            return Err(PunchError::SessionCookieMissing(
                self.cfg.session_cookie.clone(),
            ));
        }
        debug!(cookie = %self.cfg.session_cookie, "form session acquired");
        Ok(())
    }

    /// GET the detail page and scrape the widget id and the JSON field map
    /// out of its script block, then validate and transform the map.
    pub async fn fetch_payload(&self) -> Result<Payload, PunchError> {
        let res = self
            .cancel
            .guard(self.client.http().get(&self.cfg.detail_url).send())
            .await??;
        let body = self.cancel.guard(http::read_body(res)).await??;

        let markers = [
            Marker::new(self.cfg.widget_marker.clone(), Symbol::Quoted),
            Marker::new(self.cfg.detail_marker.clone(), Symbol::Json),
        ];
        let mut reader = Cursor::new(body);
        let mut values = scrape::scan_until_prefix(&mut reader, &markers)?.into_iter();
        let widget_id = values.next().unwrap_or_default();
        let detail = values.next().unwrap_or_default();

        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&detail)
            .map_err(|err| PunchError::DataParse(format!("form detail: {err}")))?;
        let mut form: Vec<(String, String)> = map
            .into_iter()
            .map(|(key, value)| (key, stringify(value)))
            .collect();

        if form.is_empty() {
            return Err(PunchError::IncompleteForm("empty field map".to_string()));
        }
        // A blank value means the server-side row is missing data; the
        // submission would be rejected, so fail before attempting it.
        if let Some(key) = form
            .iter()
            .find(|(_, value)| value.is_empty())
            .map(|(key, _)| key.clone())
        {
            return Err(PunchError::IncompleteForm(key));
        }

        let today = self
            .clock
            .now_in(self.tz)
            .format(&self.cfg.date_format)
            .to_string();
        upsert(&mut form, &self.cfg.date_field, today);

        let user_id = form
            .iter()
            .find(|(key, _)| key == &self.cfg.user_id_field)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| {
                PunchError::DataParse(format!("missing field {:?}", self.cfg.user_id_field))
            })?;
        form.retain(|(key, _)| !self.cfg.strip_fields.contains(key));

        debug!(widget_id = %widget_id, fields = form.len(), "payload scraped");
        Ok(Payload {
            form,
            widget_id,
            user_id,
        })
    }

    /// POST the filled form and classify the server's reply.
    pub async fn submit(&self, payload: Payload) -> Result<(), PunchError> {
        let res = self
            .cancel
            .guard(
                self.client
                    .http()
                    .post(&self.cfg.submit_url)
                    .query(&[
                        ("wid", payload.widget_id.as_str()),
                        ("userId", payload.user_id.as_str()),
                    ])
                    .header(ACCEPT, "application/json, text/javascript, */*; q=0.01")
                    .header("X-Requested-With", "XMLHttpRequest")
                    .form(&payload.form)
                    .send(),
            )
            .await??;

        let status = res.status();
        if status != StatusCode::OK {
            return Err(PunchError::SubmitStatus(status));
        }

        let body = self.cancel.guard(http::read_body(res)).await??;
        let markers = [Marker::new(self.cfg.result_marker.clone(), Symbol::Quoted)];
        let mut reader = Cursor::new(body);
        let outcome = match scrape::scan_until_prefix(&mut reader, &markers) {
            Ok(values) => values.into_iter().next().unwrap_or_default(),
            Err(PunchError::Incomplete { .. }) => String::new(),
            Err(err) => return Err(err),
        };

        if self.cfg.success_phrases.iter().any(|phrase| phrase == &outcome) {
            info!(outcome = %outcome, "form submitted");
            Ok(())
        } else if outcome == self.cfg.incomplete_phrase {
            Err(PunchError::IncompleteForm(outcome))
        } else {
            Err(PunchError::UnknownSubmissionResult(outcome))
        }
    }
}

fn stringify(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn upsert(form: &mut Vec<(String, String)>, key: &str, value: String) {
    match form.iter_mut().find(|(name, _)| name == key) {
        Some((_, slot)) => *slot = value,
        None => form.push((key.to_string(), value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stringify_keeps_strings_and_renders_scalars() {
        assert_eq!(stringify(serde_json::json!("36.5")), "36.5");
        assert_eq!(stringify(serde_json::json!(7)), "7");
        assert_eq!(stringify(serde_json::json!(true)), "true");
        assert_eq!(stringify(serde_json::json!(null)), "");
    }

    #[test]
    fn upsert_overwrites_or_appends() {
        let mut form = vec![("a".to_string(), "1".to_string())];
        upsert(&mut form, "a", "2".to_string());
        assert_eq!(form, vec![("a".to_string(), "2".to_string())]);
        upsert(&mut form, "b", "3".to_string());
        assert_eq!(form.len(), 2);
        assert_eq!(form[1], ("b".to_string(), "3".to_string()));
    }
}
