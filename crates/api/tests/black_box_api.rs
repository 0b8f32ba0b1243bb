use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, COOKIE, LOCATION, SET_COOKIE};

use sentinel_auth::Enforcer;
use sentinel_infra::{CsrfGuard, SessionManager, Settings};

const MODEL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../conf/auth_model.conf"));
const POLICY: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../conf/policy.csv"));

const SETTINGS: &str = r#"
[[users]]
name = "admin"
password = "admin-pass"
roles = ["admin"]

[[users]]
name = "olivia"
password = "operator-pass"
roles = ["operator"]
"#;

struct TestServer {
    base_url: String,
    sessions: Arc<SessionManager>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port.
        let settings = Settings::from_toml_str(SETTINGS).expect("settings should parse");
        let enforcer = Arc::new(Enforcer::load(MODEL, POLICY).expect("policy should load"));
        let sessions = Arc::new(SessionManager::in_memory(
            settings.session_settings().unwrap(),
        ));
        let csrf = Arc::new(CsrfGuard::new());
        let app = sentinel_api::app::build_app(&settings, enforcer, Arc::clone(&sessions), csrf);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            sessions,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

fn set_cookie(res: &reqwest::Response, name: &str) -> Option<String> {
    res.headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

/// A logged-in browser-less client: session id and CSRF token.
struct Login {
    session: String,
    csrf: String,
}

async fn anonymous_session(srv: &TestServer, client: &reqwest::Client) -> Login {
    let res = client.get(srv.url("/admin/login/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let session = set_cookie(&res, "sentinel_session").expect("session cookie issued");
    let body: serde_json::Value = res.json().await.unwrap();
    Login {
        session,
        csrf: body["csrf_token"].as_str().unwrap().to_string(),
    }
}

async fn login(srv: &TestServer, client: &reqwest::Client, user: &str, password: &str) -> Login {
    let anon = anonymous_session(srv, client).await;
    let res = client
        .post(srv.url("/admin/login/"))
        .header(COOKIE, format!("sentinel_session={}", anon.session))
        .form(&[("username", user), ("password", password), ("_csrf", anon.csrf.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let session = set_cookie(&res, "sentinel_session").expect("rotated session cookie");
    assert_ne!(session, anon.session);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["subject"], user);
    Login {
        session,
        csrf: body["csrf_token"].as_str().unwrap().to_string(),
    }
}

#[tokio::test]
async fn health_is_open() {
    let srv = TestServer::spawn().await;
    let res = client().get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(set_cookie(&res, "sentinel_session").is_none());
}

#[tokio::test]
async fn anonymous_browser_is_redirected_to_login() {
    let srv = TestServer::spawn().await;
    let res = client()
        .get(srv.url("/admin/users/list/"))
        .header(ACCEPT, "text/html,application/xhtml+xml")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(
        res.headers()[LOCATION],
        "/admin/login/?next=%2Fadmin%2Fusers%2Flist%2F"
    );
    assert!(set_cookie(&res, "sentinel_session").is_some());
}

#[tokio::test]
async fn anonymous_api_client_is_forbidden() {
    let srv = TestServer::spawn().await;
    let res = client()
        .get(srv.url("/admin/users/list/"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "error": "forbidden" }));
}

#[tokio::test]
async fn login_requires_csrf_token() {
    let srv = TestServer::spawn().await;
    let client = client();
    let anon = anonymous_session(&srv, &client).await;

    let res = client
        .post(srv.url("/admin/login/"))
        .header(COOKIE, format!("sentinel_session={}", anon.session))
        .form(&[("username", "admin"), ("password", "admin-pass")])
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "csrf_failed");
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let srv = TestServer::spawn().await;
    let client = client();
    let anon = anonymous_session(&srv, &client).await;

    let res = client
        .post(srv.url("/admin/login/"))
        .header(COOKIE, format!("sentinel_session={}", anon.session))
        .header("X-CSRFToken", anon.csrf.as_str())
        .form(&[("username", "admin"), ("password", "nope")])
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_can_read_and_write_with_fresh_token() {
    let srv = TestServer::spawn().await;
    let client = client();
    let admin = login(&srv, &client, "admin", "admin-pass").await;
    let cookie = format!("sentinel_session={}", admin.session);

    let res = client
        .get(srv.url("/admin/users/"))
        .header(COOKIE, cookie.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["section"], "users");
    assert_eq!(body["subject"], "admin");

    let res = client
        .post(srv.url("/admin/users/new/"))
        .header(COOKIE, cookie.as_str())
        .header("X-CSRFToken", admin.csrf.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn token_from_before_login_is_rejected() {
    let srv = TestServer::spawn().await;
    let client = client();
    let anon = anonymous_session(&srv, &client).await;

    let res = client
        .post(srv.url("/admin/login/"))
        .header(COOKIE, format!("sentinel_session={}", anon.session))
        .form(&[("username", "admin"), ("password", "admin-pass"), ("_csrf", anon.csrf.as_str())])
        .send()
        .await
        .unwrap();
    let session = set_cookie(&res, "sentinel_session").unwrap();

    let res = client
        .post(srv.url("/admin/users/new/"))
        .header(COOKIE, format!("sentinel_session={session}"))
        .header("X-CSRFToken", anon.csrf.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "csrf_failed");
}

#[tokio::test]
async fn inherited_role_and_explicit_deny() {
    let srv = TestServer::spawn().await;
    let client = client();
    let olivia = login(&srv, &client, "olivia", "operator-pass").await;
    let cookie = format!("sentinel_session={}", olivia.session);

    // operator inherits auditor.
    let res = client
        .get(srv.url("/admin/reports/weekly/"))
        .header(COOKIE, cookie.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(srv.url("/admin/assets/new/"))
        .header(COOKIE, cookie.as_str())
        .header("X-CSRFToken", olivia.csrf.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(srv.url("/admin/assets/del_all/"))
        .header(COOKIE, cookie.as_str())
        .header("X-CSRFToken", olivia.csrf.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(srv.url("/admin/users/"))
        .header(COOKIE, cookie.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn deny_holds_for_every_spelling_of_the_path() {
    let srv = TestServer::spawn().await;
    let client = client();
    let olivia = login(&srv, &client, "olivia", "operator-pass").await;
    let cookie = format!("sentinel_session={}", olivia.session);

    let post = |path: &str| {
        client
            .post(srv.url(path))
            .header(COOKIE, cookie.as_str())
            .header("X-CSRFToken", olivia.csrf.as_str())
            .send()
    };

    // Already canonical; the deny on the slashed form covers it.
    let res = post("/admin/assets/del_all").await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    for (path, location) in [
        ("/admin/assets//del_all/", "/admin/assets/del_all/"),
        ("/admin/assets/del%5Fall/", "/admin/assets/del_all/"),
        ("/admin//assets/del_all?confirm=1", "/admin/assets/del_all?confirm=1"),
    ] {
        let res = post(path).await.unwrap();
        assert_eq!(res.status(), StatusCode::PERMANENT_REDIRECT, "{path}");
        assert_eq!(res.headers()[LOCATION], location, "{path}");
    }

    let res = post("/admin/assets/del_all/").await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = post("/admin/assets/new/").await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let srv = TestServer::spawn().await;
    let client = client();
    let admin = login(&srv, &client, "admin", "admin-pass").await;
    let cookie = format!("sentinel_session={}", admin.session);
    assert_eq!(srv.sessions.len(), 1);

    let res = client
        .get(srv.url("/admin/logout/"))
        .header(COOKIE, cookie.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["logged_out"], true);

    let res = client
        .get(srv.url("/whoami"))
        .header(COOKIE, cookie.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["authenticated"], false);
    assert_eq!(body["subject"], "anonymous");
}

#[tokio::test]
async fn unknown_route_behind_allow_is_404() {
    let srv = TestServer::spawn().await;
    let client = client();
    let admin = login(&srv, &client, "admin", "admin-pass").await;

    let res = client
        .get(srv.url("/admin"))
        .header(COOKIE, format!("sentinel_session={}", admin.session))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Allowed by `/admin/*`, but no route serves it.
    let res = client
        .get(srv.url("/admin/x"))
        .header(COOKIE, format!("sentinel_session={}", admin.session))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
