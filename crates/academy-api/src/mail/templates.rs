//! Verification and password-reset mails

use super::OutgoingMail;
use crate::auth::models::TokenPurpose;

/// Link the frontend handles, with the raw token as query parameter
pub fn token_link(base_url: &str, token: &str) -> String {
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!("{base_url}{separator}token={token}")
}

pub fn verification_mail(to: &str, username: &str, link: &str, ttl_minutes: i64) -> OutgoingMail {
    let text = format!(
        "Hello {username},\n\n\
         Welcome to OpenAcademy. Please confirm your email address by opening the link below:\n\n\
         {link}\n\n\
         This link is valid for {ttl_minutes} minutes. If you did not create an account, you can ignore this message.\n"
    );

    let html = format!(
        "<p>Hello {username},</p>\
         <p>Welcome to OpenAcademy. Please confirm your email address:</p>\
         <p><a href=\"{link}\">Verify my email</a></p>\
         <p>This link is valid for {ttl_minutes} minutes. If you did not create an account, you can ignore this message.</p>",
        username = escape_html(username),
        link = escape_html(link),
    );

    OutgoingMail {
        to: to.to_string(),
        subject: "Verify your email address".to_string(),
        html,
        text,
    }
}

pub fn password_reset_mail(to: &str, username: &str, link: &str, ttl_minutes: i64) -> OutgoingMail {
    let text = format!(
        "Hello {username},\n\n\
         A password reset was requested for your account. Choose a new password here:\n\n\
         {link}\n\n\
         This link is valid for {ttl_minutes} minutes. If you did not request a reset, no action is needed.\n"
    );

    let html = format!(
        "<p>Hello {username},</p>\
         <p>A password reset was requested for your account.</p>\
         <p><a href=\"{link}\">Choose a new password</a></p>\
         <p>This link is valid for {ttl_minutes} minutes. If you did not request a reset, no action is needed.</p>",
        username = escape_html(username),
        link = escape_html(link),
    );

    OutgoingMail {
        to: to.to_string(),
        subject: "Reset your password".to_string(),
        html,
        text,
    }
}

/// Pick the template for a checkout purpose
pub fn checkout_mail(
    purpose: TokenPurpose,
    to: &str,
    username: &str,
    link: &str,
    ttl_minutes: i64,
) -> OutgoingMail {
    match purpose {
        TokenPurpose::EmailVerification => verification_mail(to, username, link, ttl_minutes),
        TokenPurpose::PasswordReset => password_reset_mail(to, username, link, ttl_minutes),
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
