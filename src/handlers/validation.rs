use garde::Validate;

use crate::error::AppError;

/// リクエストDTOを検証し、失敗を 400 に変換
pub fn validate_request<T>(request: &T) -> Result<(), AppError>
where
    T: Validate<Context = ()>,
{
    request
        .validate()
        .map_err(|report| AppError::Validation(report.to_string()))
}

/// 空白のみ・空文字を拒否
pub fn not_blank(value: &str, _context: &()) -> garde::Result {
    if value.trim().is_empty() {
        Err(garde::Error::new("必須項目です"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_blank() {
        assert!(not_blank("Taro", &()).is_ok());
        assert!(not_blank("   ", &()).is_err());
        assert!(not_blank("", &()).is_err());
    }
}
