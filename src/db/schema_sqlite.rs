diesel::table! {
    account_authorizations (handle) {
        handle -> Text,
        internal_id -> Text,
        access_token -> Text,
        granted_at -> Text,
    }
}

diesel::table! {
    bot_profile (id) {
        id -> Integer,
        avatar_url -> Nullable<Text>,
        avatar_source -> Nullable<Text>,
        updated_at -> Text,
    }
}

diesel::table! {
    room_links (room_id) {
        room_id -> Text,
        handle -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    delivered_media (id) {
        id -> Integer,
        account_internal_id -> Text,
        post_id -> Text,
        message_id -> Text,
        room_id -> Text,
        delivered_at -> Text,
    }
}

diesel::table! {
    media_expiration (account_internal_id) {
        account_internal_id -> Text,
        expires_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    account_authorizations,
    bot_profile,
    room_links,
    delivered_media,
    media_expiration,
);
