//! Login state machine.
//!
//! One session walks `fetch login page → scrape hidden fields → fetch and
//! recognize captcha → POST credentials → classify`. A redirect-class
//! response is the success signal and leaves the authenticated cookies in
//! the client's jar; the server's wrong-captcha message is the only
//! rejection worth retrying, bounded by the configured attempt counts.

use std::io::Cursor;

use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::captcha::{self, CaptchaSolver};
use crate::config::LoginConfig;
use crate::credentials::Credential;
use crate::error::PunchError;
use crate::http::{self, HttpConfig, SessionClient};
use crate::scrape::{self, FormTemplate};

pub struct LoginSession<'a> {
    client: &'a SessionClient,
    solver: &'a dyn CaptchaSolver,
    cfg: &'a LoginConfig,
    cancel: &'a CancellationToken,
}

impl<'a> LoginSession<'a> {
    pub fn new(
        client: &'a SessionClient,
        solver: &'a dyn CaptchaSolver,
        cfg: &'a LoginConfig,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            client,
            solver,
            cfg,
            cancel,
        }
    }

    /// Run the login state machine to completion. On success the client's
    /// cookie jar holds the authenticated session.
    pub async fn login(&self, credential: &Credential) -> Result<(), PunchError> {
        let template = self.fetch_login_form().await?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.submit_once(credential, &template).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) if err.is_captcha_retry() && attempt < self.cfg.login_attempts => {
                    warn!(attempt, error = %err, "login attempt failed, retrying");
                    self.cancel.wait(self.cfg.retry_delay).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// GET the login page and harvest its hidden fields.
    async fn fetch_login_form(&self) -> Result<FormTemplate, PunchError> {
        let res = self
            .cancel
            .guard(self.client.http().get(&self.cfg.login_url).send())
            .await??;
        let body = self.cancel.guard(http::read_body(res)).await??;

        let mut template = FormTemplate::with_fields(self.cfg.hidden_fields.iter().cloned());
        let mut reader = Cursor::new(body);
        scrape::fill_map(&mut reader, &mut template, |key| {
            self.cfg.hidden_fields.iter().any(|field| field == key)
        })?;
        debug!(fields = self.cfg.hidden_fields.len(), "login form scraped");
        Ok(template)
    }

    /// One captcha + POST round.
    async fn submit_once(
        &self,
        credential: &Credential,
        template: &FormTemplate,
    ) -> Result<(), PunchError> {
        let captcha_text = if self.cfg.captcha_url.is_empty() {
            None
        } else {
            Some(self.recognize_captcha().await?)
        };

        let salt = template.get(&self.cfg.salt_field).unwrap_or_default();
        let mut form: Vec<(String, String)> = Vec::new();
        form.push((
            self.cfg.username_field.clone(),
            credential.username().to_string(),
        ));
        form.push((self.cfg.secret_field.clone(), credential.hashed_secret(salt)));
        if let Some(text) = captcha_text {
            form.push((self.cfg.captcha_field.clone(), text));
        }
        for (key, value) in template.iter() {
            if key == self.cfg.salt_field || key == self.cfg.error_field {
                continue;
            }
            form.push((key.to_string(), value.to_string()));
        }
        for (key, value) in &self.cfg.fixed_fields {
            form.push((key.clone(), value.clone()));
        }

        let res = self
            .cancel
            .guard(
                self.client
                    .no_redirect()
                    .post(&self.cfg.login_url)
                    .form(&form)
                    .send(),
            )
            .await??;

        if res.status().is_redirection() {
            info!("login accepted");
            return Ok(());
        }

        let body = self.cancel.guard(http::read_body(res)).await??;
        let mut errors = FormTemplate::with_fields([self.cfg.error_field.clone()]);
        let mut reader = Cursor::new(body);
        scrape::fill_map(&mut reader, &mut errors, |key| key == self.cfg.error_field)?;
        match errors.get(&self.cfg.error_field) {
            Some(message) if message == self.cfg.wrong_captcha_message => {
                Err(PunchError::CaptchaMismatch)
            }
            Some(message) if !message.is_empty() => {
                Err(PunchError::LoginRejected(message.to_string()))
            }
            _ => Err(PunchError::DataParse(
                "login response carries no error message".to_string(),
            )),
        }
    }

    /// Fetch and recognize a captcha, retrying on bad images or
    /// wrong-length text up to the inner bound.
    async fn recognize_captcha(&self) -> Result<String, PunchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_captcha().await {
                Ok(text) => return Ok(text),
                Err(PunchError::CannotRecognizeCaptcha) if attempt < self.cfg.captcha_attempts => {
                    debug!(attempt, "captcha attempt failed");
                    self.cancel.wait(self.cfg.captcha_backoff).await?;
                }
                // transport and decode failures stay hard
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_captcha(&self) -> Result<String, PunchError> {
        let res = self
            .cancel
            .guard(self.client.http().get(&self.cfg.captcha_url).send())
            .await??;
        let raw = self.cancel.guard(http::read_body(res)).await??;
        let normalized = captcha::normalize(&raw)?;
        let text = self
            .cancel
            .guard(self.solver.recognize(&normalized))
            .await?
            .map_err(|err| {
                debug!(error = %err, "captcha solver failed");
                PunchError::CannotRecognizeCaptcha
            })?;
        if text.chars().count() != self.cfg.captcha_len {
            return Err(PunchError::CannotRecognizeCaptcha);
        }
        Ok(text)
    }
}

/// Verify a credential with a throwaway session; the cookies are discarded.
pub async fn confirm(
    http_cfg: &HttpConfig,
    login_cfg: &LoginConfig,
    solver: &dyn CaptchaSolver,
    credential: &Credential,
    cancel: &CancellationToken,
) -> Result<(), PunchError> {
    let client = SessionClient::new(http_cfg)?;
    LoginSession::new(&client, solver, login_cfg, cancel)
        .login(credential)
        .await
}
