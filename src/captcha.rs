//! Captcha recognition contract.
//!
//! OCR itself lives behind [`CaptchaSolver`]; the engine only normalizes
//! the image bytes and validates the recognized text's length.

use std::io::Cursor;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::ImageFormat;
use tokio::io::AsyncWriteExt;

use crate::error::PunchError;

#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Recognize the text in a captcha image. No guarantee on output
    /// length; the login session validates it.
    async fn recognize(&self, image: &[u8]) -> Result<String>;
}

/// Decode whatever byte stream the server returned and re-encode it as
/// PNG, so the solver always sees one well-formed format.
pub fn normalize(bytes: &[u8]) -> Result<Vec<u8>, PunchError> {
    let decoded = image::load_from_memory(bytes).map_err(|_| PunchError::CannotRecognizeCaptcha)?;
    let mut out = Cursor::new(Vec::new());
    decoded
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|_| PunchError::CannotRecognizeCaptcha)?;
    Ok(out.into_inner())
}

/// Solver that pipes the image through an external OCR command, e.g.
/// `tesseract stdin stdout digits`.
pub struct CommandSolver {
    program: String,
    args: Vec<String>,
}

impl CommandSolver {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl CaptchaSolver for CommandSolver {
    async fn recognize(&self, image: &[u8]) -> Result<String> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn OCR command {:?}", self.program))?;

        let mut stdin = child.stdin.take().context("OCR command stdin not piped")?;
        stdin.write_all(image).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            anyhow::bail!("OCR command exited with {}", output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect())
    }
}
