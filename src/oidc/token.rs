//! Token lifecycle (spec.md §4.6 "Token lifecycle", §3 "Token").

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Access,
    Refresh,
    Id,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub id: Uuid,
    pub user_id: Uuid,
    pub application_id: Uuid,
    pub token_type: TokenType,
    pub scopes: Vec<String>,
    pub audiences: Vec<String>,
    pub expires_at: DateTime<Utc>,
    /// Only meaningful for [`TokenType::Refresh`]; expiry from inactivity,
    /// bumped on every successful refresh.
    pub idle_expires_at: Option<DateTime<Utc>>,
    /// Authentication method references, carried on refresh tokens.
    pub amr: Vec<String>,
}

impl Token {
    /// Expired if either the absolute expiry or, for refresh tokens, the idle
    /// expiry has passed (spec.md §4.6: "Authorization decisions reject any
    /// token whose `isTokenExpired` holds").
    pub fn is_token_expired(&self, now: DateTime<Utc>) -> bool {
        if now > self.expires_at {
            return true;
        }
        match self.idle_expires_at {
            Some(idle_expiry) => now > idle_expiry,
            None => false,
        }
    }

    /// Bumps `idle_expires_at` forward by `idle_ttl` from `now`; a no-op on
    /// non-refresh tokens since they have no idle expiry to bump.
    pub fn bump_idle_expiry(&mut self, now: DateTime<Utc>, idle_ttl: chrono::Duration) {
        if self.token_type == TokenType::Refresh {
            self.idle_expires_at = Some(now + idle_ttl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(token_type: TokenType, expires_in: Duration, idle_expires_in: Option<Duration>) -> Token {
        let now = Utc::now();
        Token {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            application_id: Uuid::new_v4(),
            token_type,
            scopes: vec!["openid".to_string()],
            audiences: vec!["https://api/".to_string()],
            expires_at: now + expires_in,
            idle_expires_at: idle_expires_in.map(|d| now + d),
            amr: vec![],
        }
    }

    #[test]
    fn access_token_expires_on_absolute_expiry_alone() {
        let expired = token(TokenType::Access, Duration::seconds(-1), None);
        assert!(expired.is_token_expired(Utc::now()));

        let live = token(TokenType::Access, Duration::seconds(60), None);
        assert!(!live.is_token_expired(Utc::now()));
    }

    #[test]
    fn token_is_not_yet_expired_at_the_exact_expiry_instant() {
        let mut live = token(TokenType::Access, Duration::seconds(60), None);
        live.expires_at = Utc::now();
        assert!(!live.is_token_expired(live.expires_at));
    }

    #[test]
    fn refresh_token_expires_on_idle_expiry_even_if_absolute_expiry_is_far_off() {
        let stale = token(TokenType::Refresh, Duration::days(30), Some(Duration::seconds(-1)));
        assert!(stale.is_token_expired(Utc::now()));
    }

    #[test]
    fn successful_refresh_bumps_idle_expiry_forward() {
        let mut refresh = token(TokenType::Refresh, Duration::days(30), Some(Duration::seconds(10)));
        let now = Utc::now();
        refresh.bump_idle_expiry(now, Duration::minutes(30));
        assert!(refresh.idle_expires_at.unwrap() > now + Duration::minutes(29));
    }
}
