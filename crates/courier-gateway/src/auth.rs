use jsonwebtoken::{DecodingKey, Validation, decode};

use courier_types::api::Claims;

/// Validate a bearer token issued by the identity service.
/// Returns `None` for anything that does not decode to unexpired claims.
pub fn verify_token(token: &str, jwt_secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}
