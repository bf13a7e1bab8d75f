use std::collections::BTreeSet;

/// 登録可能なメールドメインの許可リスト
///
/// セキュリティ境界ではなく運用ポリシー。空なら全ドメインを許可する。
#[derive(Debug, Clone)]
pub struct EmailDomainPolicy {
    allowed: BTreeSet<String>,
}

impl EmailDomainPolicy {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = domains
            .into_iter()
            .map(|d| d.as_ref().trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        Self { allowed }
    }

    pub fn is_allowed(&self, email: &str) -> bool {
        let Some((local, domain)) = email.rsplit_once('@') else {
            return false;
        };
        if local.is_empty() || domain.is_empty() {
            return false;
        }
        self.allowed.is_empty() || self.allowed.contains(&domain.to_lowercase())
    }

    /// エラーメッセージ用の一覧（カンマ区切り）
    pub fn allowed_list(&self) -> String {
        self.allowed
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
