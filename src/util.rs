const MESSAGE_ID_HEX_LEN: usize = 24;

/// Fresh Anthropic-style message id: `msg_` followed by 24 lowercase hex
/// characters of a random UUID.
pub(crate) fn new_message_id() -> String {
    let id = uuid::Uuid::from_u128(fastrand::u128(..));
    let mut buf = uuid::Uuid::encode_buffer();
    let hex = id.simple().encode_lower(&mut buf);
    let mut out = String::with_capacity(4 + MESSAGE_ID_HEX_LEN);
    out.push_str("msg_");
    out.push_str(&hex[..MESSAGE_ID_HEX_LEN]);
    out
}

#[cfg(test)]
mod tests {
    use super::new_message_id;

    #[test]
    fn message_id_shape() {
        let id = new_message_id();
        assert_eq!(id.len(), 28);
        let hex = id.strip_prefix("msg_").unwrap();
        assert!(hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        assert_ne!(new_message_id(), id);
    }
}
