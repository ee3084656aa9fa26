use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use casevault::common::auth::UserRole;
use casevault::{api, AppState};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tower::ServiceExt;

/// テスト用のJWT秘密鍵
pub const TEST_JWT_SECRET: &str = "contract-test-secret";

/// 全テストユーザー共通のパスワード
pub const TEST_PASSWORD: &str = "password123";

/// テストユーザー
#[allow(dead_code)]
pub struct TestUser {
    pub id: String,
    pub username: String,
    pub token: String,
}

/// テスト用アプリケーション
#[allow(dead_code)]
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub pool: SqlitePool,
    pub admin: TestUser,
    pub investigator: TestUser,
    pub viewer: TestUser,
    _archive_dir: Option<tempfile::TempDir>,
}

/// 単一接続のインメモリDBを作成する
pub async fn create_test_db_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

async fn create_user(pool: &SqlitePool, username: &str, role: UserRole) -> TestUser {
    // テストでは低コストでハッシュする（検証はコストに依存しない）
    let hash = bcrypt::hash(TEST_PASSWORD, 4).expect("hash password");
    let user = casevault::db::users::create(pool, username, &hash, role)
        .await
        .expect("create test user");
    let id = user.id.to_string();
    let token = casevault::auth::jwt::create_jwt(&id, username, role, TEST_JWT_SECRET)
        .expect("create jwt");
    TestUser {
        id,
        username: username.to_string(),
        token,
    }
}

#[allow(dead_code)]
impl TestApp {
    /// アーカイブDBなしで起動する
    pub async fn new() -> Self {
        Self::build(false).await
    }

    /// 一時ディレクトリのアーカイブDB付きで起動する
    pub async fn with_archive() -> Self {
        Self::build(true).await
    }

    async fn build(with_archive: bool) -> Self {
        let pool = create_test_db_pool().await;
        let (archive_pool, archive_dir) = if with_archive {
            let dir = tempfile::tempdir().expect("create temp dir");
            let path = dir.path().join("audit_archive.db");
            let archive = casevault::db::audit_log::create_archive_pool(&path.to_string_lossy())
                .await
                .expect("create archive pool");
            (Some(archive), Some(dir))
        } else {
            (None, None)
        };

        let admin = create_user(&pool, "admin", UserRole::Admin).await;
        let investigator = create_user(&pool, "investigator", UserRole::Investigator).await;
        let viewer = create_user(&pool, "viewer", UserRole::Viewer).await;

        let state = AppState::for_pool(pool.clone(), TEST_JWT_SECRET.to_string(), archive_pool);
        let router = api::create_app(state.clone());
        Self {
            router,
            state,
            pool,
            admin,
            investigator,
            viewer,
            _archive_dir: archive_dir,
        }
    }

    /// リクエストを送り、ステータスとJSONボディを返す
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, bytes) = self.request_raw(method, uri, token, body).await;
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// リクエストを送り、ステータスと生のボディを返す
    pub async fn request_raw(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", "198.51.100.7");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    /// 管理者としてリクエストする
    pub async fn admin(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request(method, uri, Some(&self.admin.token), body).await
    }

    /// 捜査員としてリクエストする
    pub async fn investigator(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.request(method, uri, Some(&self.investigator.token), body)
            .await
    }

    /// 閲覧者としてリクエストする
    pub async fn viewer(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request(method, uri, Some(&self.viewer.token), body).await
    }

    /// 監査ログのバッファを書き出す
    pub async fn flush_audit(&self) {
        self.state.audit_log_writer.flush().await;
    }

    /// 事件を作成してIDを返す
    pub async fn create_case(&self, title: &str) -> String {
        let (status, body) = self
            .investigator(
                "POST",
                "/api/v1/cases",
                Some(serde_json::json!({ "title": title, "priority": "high" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create case failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }

    /// 証拠を登録してIDを返す
    pub async fn create_evidence(&self, case_id: &str) -> String {
        let (status, body) = self
            .investigator(
                "POST",
                "/api/v1/evidence",
                Some(serde_json::json!({
                    "case_id": case_id,
                    "description": "Seized laptop",
                    "evidence_type": "computer",
                    "collected_by": "Officer Tanaka",
                    "location": "Locker 12",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create evidence failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }
}
