use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use autopunch::cancel::CancellationToken;
use autopunch::captcha::CaptchaSolver;
use autopunch::config::LoginConfig;
use autopunch::credentials::Credential;
use autopunch::error::PunchError;
use autopunch::http::{HttpConfig, SessionClient};
use autopunch::session::LoginSession;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FixedSolver(&'static str);

#[async_trait::async_trait]
impl CaptchaSolver for FixedSolver {
    async fn recognize(&self, _image: &[u8]) -> Result<String> {
        Ok(self.0.to_string())
    }
}

fn captcha_png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(24, 8, image::Rgb([200, 200, 200]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn login_cfg(server: &MockServer) -> LoginConfig {
    LoginConfig {
        login_url: format!("{}/authserver/login", server.uri()),
        captcha_url: format!("{}/authserver/captcha", server.uri()),
        captcha_backoff: Duration::from_millis(5),
        retry_delay: Duration::from_millis(5),
        ..LoginConfig::default()
    }
}

const LOGIN_PAGE: &str = concat!(
    "<!doctype html>\n",
    "<form id=\"casLoginForm\">\n",
    "<input type=\"hidden\" name=\"lt\" value=\"LT-1\">\n",
    "<input type=\"hidden\" name=\"execution\" value=\"e1s1\">\n",
    "<input type=\"hidden\" id=\"pwdDefaultEncryptSalt\" value=\"saltsalt\">\n",
    "</form>\n",
);

async fn mount_login_page(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/authserver/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_captcha(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/authserver/captcha"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(captcha_png()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn login_succeeds_on_redirect_and_collects_cookies() -> Result<()> {
    let server = MockServer::start().await;
    mount_login_page(&server).await;
    mount_captcha(&server).await;

    Mock::given(method("POST"))
        .and(path("/authserver/login"))
        .and(body_string_contains("username=student1"))
        .and(body_string_contains("captchaResponse=1234"))
        .and(body_string_contains("lt=LT-1"))
        .and(body_string_contains("execution=e1s1"))
        .and(body_string_contains("_eventId=submit"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/home")
                .insert_header("Set-Cookie", "CASTGC=ticket; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cfg = login_cfg(&server);
    let client = SessionClient::new(&HttpConfig::default())?;
    let solver = FixedSolver("1234");
    let cancel = CancellationToken::new();
    let session = LoginSession::new(&client, &solver, &cfg, &cancel);

    session
        .login(&Credential::new("student1", "hunter2"))
        .await?;

    assert_eq!(client.jar().by_name("CASTGC").len(), 1);
    // the raw secret must never appear in the POST body
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests
        .iter()
        .all(|req| !String::from_utf8_lossy(&req.body).contains("hunter2")));
    Ok(())
}

#[tokio::test]
async fn wrong_captcha_twice_then_success_takes_three_posts() -> Result<()> {
    let server = MockServer::start().await;
    mount_login_page(&server).await;
    mount_captcha(&server).await;

    let rejected = "<input type=\"hidden\" id=\"errorMsg\" value=\"Invalid verify code\">";
    Mock::given(method("POST"))
        .and(path("/authserver/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rejected))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/authserver/login"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/home")
                .insert_header("Set-Cookie", "CASTGC=ticket; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cfg = login_cfg(&server);
    let client = SessionClient::new(&HttpConfig::default())?;
    let solver = FixedSolver("1234");
    let cancel = CancellationToken::new();

    LoginSession::new(&client, &solver, &cfg, &cancel)
        .login(&Credential::new("student1", "hunter2"))
        .await?;
    Ok(())
}

#[tokio::test]
async fn other_error_message_is_a_hard_failure() -> Result<()> {
    let server = MockServer::start().await;
    mount_login_page(&server).await;
    mount_captcha(&server).await;

    let rejected = "<input type=\"hidden\" id=\"errorMsg\" value=\"Incorrect password\">";
    Mock::given(method("POST"))
        .and(path("/authserver/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rejected))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = login_cfg(&server);
    let client = SessionClient::new(&HttpConfig::default())?;
    let solver = FixedSolver("1234");
    let cancel = CancellationToken::new();

    let err = LoginSession::new(&client, &solver, &cfg, &cancel)
        .login(&Credential::new("student1", "hunter2"))
        .await
        .unwrap_err();
    assert!(matches!(err, PunchError::LoginRejected(ref msg) if msg == "Incorrect password"));
    Ok(())
}

#[tokio::test]
async fn unrecognizable_captcha_exhausts_both_retry_bounds() -> Result<()> {
    let server = MockServer::start().await;
    mount_login_page(&server).await;

    // 3 captcha attempts per login attempt, 3 login attempts, no POSTs
    Mock::given(method("GET"))
        .and(path("/authserver/captcha"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(captcha_png()))
        .expect(9)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/authserver/login"))
        .respond_with(ResponseTemplate::new(302))
        .expect(0)
        .mount(&server)
        .await;

    let cfg = login_cfg(&server);
    let client = SessionClient::new(&HttpConfig::default())?;
    let solver = FixedSolver("42"); // wrong length
    let cancel = CancellationToken::new();

    let err = LoginSession::new(&client, &solver, &cfg, &cancel)
        .login(&Credential::new("student1", "hunter2"))
        .await
        .unwrap_err();
    assert!(matches!(err, PunchError::CannotRecognizeCaptcha));
    Ok(())
}

#[tokio::test]
async fn gzip_encoded_login_page_is_decoded_before_scraping() -> Result<()> {
    let server = MockServer::start().await;

    let page = LOGIN_PAGE.replace("LT-1", "LT-9");
    Mock::given(method("GET"))
        .and(path("/authserver/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Encoding", "gzip")
                .set_body_bytes(gzip(page.as_bytes())),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_captcha(&server).await;

    Mock::given(method("POST"))
        .and(path("/authserver/login"))
        .and(body_string_contains("lt=LT-9"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/home")
                .insert_header("Set-Cookie", "CASTGC=ticket; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cfg = login_cfg(&server);
    let client = SessionClient::new(&HttpConfig::default())?;
    let solver = FixedSolver("1234");
    let cancel = CancellationToken::new();

    LoginSession::new(&client, &solver, &cfg, &cancel)
        .login(&Credential::new("student1", "hunter2"))
        .await?;
    Ok(())
}
