//! Routes forwarding capability requests to a ready session.

use super::AppState;
use crate::error::{ApiError, ApiResult};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use courier::client::{ClientRequest, MediaPayload, MessageContent};
use serde::Deserialize;
use serde_json::{Value, json};

/// Body of `POST /api/sendMessage/{id}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendMessageBody {
    chat_id: String,
    content_type: String,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    options: Value,
}

/// Map the wire `contentType` onto message content.
fn message_content(content_type: &str, content: Value) -> ApiResult<MessageContent> {
    let unprocessable = |msg: &str| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, msg);
    match content_type {
        "string" => match content {
            Value::String(body) => Ok(MessageContent::Text { body }),
            _ => Err(unprocessable("content must be a string")),
        },
        "MessageMedia" => serde_json::from_value::<MediaPayload>(content)
            .map(MessageContent::Media)
            .map_err(|e| unprocessable(&format!("invalid MessageMedia content: {e}"))),
        "MessageMediaFromURL" => match content {
            Value::String(url) => Ok(MessageContent::MediaFromUrl { url }),
            _ => Err(unprocessable("content must be a URL string")),
        },
        _ => Err(ApiError::not_found(
            "contentType invalid, must be string, MessageMedia, MessageMediaFromURL",
        )),
    }
}

/// `POST /api/sendMessage/{id}`
pub(super) async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> ApiResult<Json<Value>> {
    state.manager.validate(&id).await?;
    let content = message_content(&body.content_type, body.content)?;
    let request = ClientRequest::SendMessage {
        chat_id: body.chat_id,
        content,
        options: body.options,
    };
    let message = state.manager.call(&id, request).await?;
    Ok(Json(json!({ "success": true, "message": message })))
}

/// `GET /api/getSessionInfo/{id}`
pub(super) async fn get_session_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let info = state.manager.call(&id, ClientRequest::Info).await?;
    Ok(Json(json!({ "success": true, "sessionInfo": info })))
}

#[derive(Debug, Deserialize)]
pub(super) struct IsRegisteredUserBody {
    id: String,
}

/// `POST /api/isRegisteredUser/{id}`
pub(super) async fn is_registered_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IsRegisteredUserBody>,
) -> ApiResult<Json<Value>> {
    let valid = state
        .manager
        .call(&id, ClientRequest::IsRegisteredUser { id: body.id })
        .await?;
    Ok(Json(json!({ "success": true, "valid": valid })))
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateGroupBody {
    name: String,
    #[serde(default)]
    participants: Vec<String>,
}

/// `POST /api/createGroup/{id}`
pub(super) async fn create_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CreateGroupBody>,
) -> ApiResult<Json<Value>> {
    let request = ClientRequest::CreateGroup {
        name: body.name,
        participants: body.participants,
    };
    let response = state.manager.call(&id, request).await?;
    Ok(Json(json!({ "success": true, "response": response })))
}

#[derive(Debug, Deserialize)]
pub(super) struct SetStatusBody {
    status: String,
}

/// `POST /api/setStatus/{id}`
pub(super) async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SetStatusBody>,
) -> ApiResult<Json<Value>> {
    state
        .manager
        .call(&id, ClientRequest::SetStatus { status: body.status })
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// `GET /api/getContacts/{id}`
pub(super) async fn get_contacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let contacts = state.manager.call(&id, ClientRequest::GetContacts).await?;
    Ok(Json(json!({ "success": true, "contacts": contacts })))
}

/// `GET /api/getChats/{id}`
pub(super) async fn get_chats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let chats = state.manager.call(&id, ClientRequest::GetChats).await?;
    Ok(Json(json!({ "success": true, "chats": chats })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ProfilePicBody {
    contact_id: String,
}

/// `POST /api/getProfilePicUrl/{id}`
pub(super) async fn get_profile_pic_url(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ProfilePicBody>,
) -> ApiResult<Json<Value>> {
    let url = state
        .manager
        .call(
            &id,
            ClientRequest::GetProfilePicUrl {
                contact_id: body.contact_id,
            },
        )
        .await?;
    Ok(Json(json!({ "success": true, "profilePicUrl": url })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_content_mapping() {
        assert_eq!(
            message_content("string", json!("hi")).unwrap(),
            MessageContent::Text {
                body: "hi".to_string()
            }
        );
        assert_eq!(
            message_content("MessageMediaFromURL", json!("https://example.com/a.png")).unwrap(),
            MessageContent::MediaFromUrl {
                url: "https://example.com/a.png".to_string()
            }
        );

        let media = message_content(
            "MessageMedia",
            json!({ "mimetype": "image/png", "data": "aGk=", "filename": "a.png" }),
        )
        .unwrap();
        assert!(matches!(media, MessageContent::Media(m) if m.filename.as_deref() == Some("a.png")));

        let err = message_content("Buttons", Value::Null).unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
