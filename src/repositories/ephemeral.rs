//! 期限付きレコードのストア
//!
//! 仮登録とパスワードリセット要求を、トークンを主キー・メールアドレスを
//! 副インデックスとして保持する。期限切れのレコードは読み取り時に不在として
//! 扱われ、定期スイープで物理削除される。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::clock::Clock;

/// ストアに格納できるレコード
pub trait EphemeralRecord: Clone + Send + Sync + 'static {
    /// 主キー（トークンのハッシュ）
    fn token(&self) -> &str;
    /// 副インデックス
    fn email(&self) -> &str;
    fn expires_at(&self) -> OffsetDateTime;

    fn is_live_at(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("トークンが重複しています")]
    DuplicateToken,

    #[error("このメールアドレスには有効なレコードが既に存在します")]
    DuplicateEmail,

    #[error("レコードが見つかりません")]
    NotFound,
}

/// 既存レコードから置き換え後のレコードを作る関数
pub type Rebuild<R> = Box<dyn FnOnce(&R) -> R + Send>;

/// 期限付きレコードのストア
///
/// 複合操作（take / refresh_by_email / reissue）は単一のクリティカルセクションで実行され、
/// 同一キーに対する読み書きは線形化される。
#[async_trait]
pub trait EphemeralStore<R: EphemeralRecord>: Send + Sync {
    /// 新規挿入
    ///
    /// # Errors
    /// - `DuplicateToken`: 同じトークンが既に存在
    /// - `DuplicateEmail`: 同じメールアドレスの有効なレコードが存在
    async fn put(&self, record: R) -> Result<(), StoreError>;

    async fn get_by_token(&self, token: &str) -> Result<Option<R>, StoreError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<R>, StoreError>;

    /// 冪等な削除
    async fn delete_by_token(&self, token: &str) -> Result<(), StoreError>;

    /// 有効なレコードを取り出して削除する（一度きりの消費）
    async fn take(&self, token: &str) -> Result<Option<R>, StoreError>;

    /// メールアドレスの有効なレコードを `rebuild` の結果で置き換える
    ///
    /// 参照と置き換えは同じクリティカルセクションで行われるため、
    /// 同時に呼ばれても有効なレコードがある限り失敗しない。
    ///
    /// # Returns
    /// 新しいレコード
    ///
    /// # Errors
    /// - `NotFound`: 有効なレコードが存在しない
    async fn refresh_by_email(&self, email: &str, rebuild: Rebuild<R>) -> Result<R, StoreError>;

    /// 同じメールアドレスのレコードを破棄してから挿入する
    ///
    /// # Returns
    /// 置き換えられた有効なレコード
    async fn reissue(&self, record: R) -> Result<Option<R>, StoreError>;

    /// 期限切れレコードを削除
    ///
    /// # Returns
    /// 削除件数
    async fn sweep_expired(&self) -> Result<usize, StoreError>;
}

struct Index<R> {
    by_token: HashMap<String, R>,
    by_email: HashMap<String, String>,
}

impl<R: EphemeralRecord> Index<R> {
    fn new() -> Self {
        Self {
            by_token: HashMap::new(),
            by_email: HashMap::new(),
        }
    }

    fn live_by_token(&self, token: &str, now: OffsetDateTime) -> Option<&R> {
        self.by_token
            .get(token)
            .filter(|record| record.is_live_at(now))
    }

    fn live_by_email(&self, email: &str, now: OffsetDateTime) -> Option<&R> {
        self.by_email
            .get(email)
            .and_then(|token| self.live_by_token(token, now))
    }

    fn remove(&mut self, token: &str) -> Option<R> {
        let record = self.by_token.remove(token)?;
        // 副インデックスは同じトークンを指している場合のみ外す
        if self.by_email.get(record.email()).map(String::as_str) == Some(token) {
            self.by_email.remove(record.email());
        }
        Some(record)
    }

    /// 検査なしで戻す（置き換え失敗時のロールバック用）
    fn restore(&mut self, record: R) {
        self.by_email
            .insert(record.email().to_string(), record.token().to_string());
        self.by_token.insert(record.token().to_string(), record);
    }

    fn remove_by_email(&mut self, email: &str) -> Option<R> {
        let token = self.by_email.get(email)?.clone();
        self.remove(&token)
    }

    fn insert(&mut self, record: R, now: OffsetDateTime) -> Result<(), StoreError> {
        if self.by_token.contains_key(record.token()) {
            return Err(StoreError::DuplicateToken);
        }
        if self.live_by_email(record.email(), now).is_some() {
            return Err(StoreError::DuplicateEmail);
        }
        // 期限切れの残骸はここで掃除する
        self.remove_by_email(record.email());

        self.by_email
            .insert(record.email().to_string(), record.token().to_string());
        self.by_token.insert(record.token().to_string(), record);
        Ok(())
    }
}

/// プロセス内メモリのストア
pub struct InMemoryEphemeralStore<R> {
    clock: Arc<dyn Clock>,
    index: RwLock<Index<R>>,
}

impl<R: EphemeralRecord> InMemoryEphemeralStore<R> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            index: RwLock::new(Index::new()),
        }
    }

    /// 物理的に保持している件数（期限切れを含む）
    pub async fn len(&self) -> usize {
        self.index.read().await.by_token.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<R: EphemeralRecord> EphemeralStore<R> for InMemoryEphemeralStore<R> {
    async fn put(&self, record: R) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.index.write().await.insert(record, now)
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<R>, StoreError> {
        let now = self.clock.now();
        Ok(self.index.read().await.live_by_token(token, now).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<R>, StoreError> {
        let now = self.clock.now();
        Ok(self.index.read().await.live_by_email(email, now).cloned())
    }

    async fn delete_by_token(&self, token: &str) -> Result<(), StoreError> {
        self.index.write().await.remove(token);
        Ok(())
    }

    async fn take(&self, token: &str) -> Result<Option<R>, StoreError> {
        let now = self.clock.now();
        let mut index = self.index.write().await;
        if index.live_by_token(token, now).is_none() {
            return Ok(None);
        }
        Ok(index.remove(token))
    }

    async fn refresh_by_email(&self, email: &str, rebuild: Rebuild<R>) -> Result<R, StoreError> {
        let now = self.clock.now();
        let mut index = self.index.write().await;
        let current = index
            .live_by_email(email, now)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        let next = rebuild(&current);
        if next.token() != current.token() && index.by_token.contains_key(next.token()) {
            return Err(StoreError::DuplicateToken);
        }

        index.remove(current.token());
        if let Err(e) = index.insert(next.clone(), now) {
            index.restore(current);
            return Err(e);
        }
        Ok(next)
    }

    async fn reissue(&self, record: R) -> Result<Option<R>, StoreError> {
        let now = self.clock.now();
        let mut index = self.index.write().await;
        if index.by_token.contains_key(record.token()) {
            return Err(StoreError::DuplicateToken);
        }
        let previous = index
            .remove_by_email(record.email())
            .filter(|previous| previous.is_live_at(now));
        index.insert(record, now)?;
        Ok(previous)
    }

    async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut index = self.index.write().await;
        let expired: Vec<String> = index
            .by_token
            .values()
            .filter(|record| !record.is_live_at(now))
            .map(|record| record.token().to_string())
            .collect();
        for token in &expired {
            index.remove(token);
        }
        Ok(expired.len())
    }
}
