use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::response::Redirect;
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{self, DbPool};
use crate::error::{AppError, AppResult};
use crate::models::User;

pub const SESSION_COOKIE: &str = "session";
pub const MIN_PASSWORD_LEN: usize = 6;

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Password(e.to_string()))?;
    Ok(hash.to_string())
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Returns the user id when the username exists and the password matches.
pub fn authenticate(conn: &Connection, username: &str, password: &str) -> AppResult<Option<i64>> {
    let Some((user_id, hash)) = db::user_credentials(conn, username)? else {
        return Ok(None);
    };
    Ok(verify_password(&hash, password).then_some(user_id))
}

/// Stores a fresh session for `user_id`, drops the oldest ones beyond
/// `max_sessions`, and sets the session cookie.
pub fn start_session(
    conn: &Connection,
    cookies: &CookieJar<'_>,
    user_id: i64,
    max_sessions: i64,
) -> AppResult<()> {
    let token = Uuid::new_v4().to_string();
    db::create_session(conn, user_id, &token, Utc::now())?;
    db::prune_sessions(conn, user_id, max_sessions)?;

    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookies.add(cookie);
    info!(user_id, "session started");
    Ok(())
}

pub fn end_session(pool: &DbPool, cookies: &CookieJar<'_>) {
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        if let Ok(conn) = pool.get() {
            if let Err(e) = db::delete_session(&conn, cookie.value()) {
                debug!(error = %e, "could not delete session");
            }
        }
    }
    cookies.remove(Cookie::build(SESSION_COOKIE).path("/"));
}

pub fn current_user(conn: &Connection, cookies: &CookieJar<'_>) -> Option<User> {
    let token = cookies.get(SESSION_COOKIE)?.value().to_string();
    db::user_by_session(conn, &token).ok().flatten()
}

/// Sends visitors without a session to `/login`, or to `/setup` while no
/// account exists yet.
pub fn require_user(pool: &DbPool, cookies: &CookieJar<'_>) -> Result<User, Redirect> {
    let conn = pool.get().map_err(|_| Redirect::to("/login"))?;
    if !db::has_users(&conn).unwrap_or(false) {
        return Err(Redirect::to("/setup"));
    }
    current_user(&conn, cookies).ok_or_else(|| Redirect::to("/login"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::memory_db;

    #[test]
    fn hashed_password_verifies() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password(&hash, "correct horse"));
        assert!(!verify_password(&hash, "wrong horse"));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("not-a-phc-string", "anything"));
    }

    #[test]
    fn authenticate_checks_user_and_password() {
        let conn = memory_db();
        let hash = hash_password("secret1").unwrap();
        let id = db::insert_user(&conn, "editor", &hash, Utc::now()).unwrap();

        assert_eq!(authenticate(&conn, "editor", "secret1").unwrap(), Some(id));
        assert_eq!(authenticate(&conn, "editor", "secret2").unwrap(), None);
        assert_eq!(authenticate(&conn, "nobody", "secret1").unwrap(), None);
    }
}
