//! Chat-bot funnel service: start, question navigation, tracking sessions and flow saving

use crate::chatbot::{
    compile_flow, normalize_navigation, EditorEdge, EditorNode, RenderContext, ANONYMOUS_USER_NAME,
};
use crate::error::{AppError, AppResult};
use crate::models::{ChatBotFlow, ChatBotQuestion, ChatBotSession, CruiseProduct, User, PURCHASE_FLOW_CATEGORY};
use crate::repositories::chatbot_repository::{ChatSessionUpdate, NewChatSession};
use crate::repositories::{ChatBotRepository, TripRepository};
use crate::services::input::{clean, opt_i64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Question as served to the client, placeholders already rendered
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedQuestion {
    pub id: i64,
    pub flow_id: i64,
    pub question_text: String,
    pub question_type: String,
    pub information: Option<String>,
    pub option_a: Option<String>,
    pub option_b: Option<String>,
    pub next_question_id_a: Option<i64>,
    pub next_question_id_b: Option<i64>,
    pub next_question_ids: Option<Value>,
    pub order: rust_decimal::Decimal,
}

impl RenderedQuestion {
    fn render(question: ChatBotQuestion, ctx: &RenderContext<'_>) -> Self {
        Self {
            question_text: ctx.render(&question.question_text),
            information: ctx.render_opt(question.information.as_deref()),
            option_a: ctx.render_opt(question.option_a.as_deref()),
            option_b: ctx.render_opt(question.option_b.as_deref()),
            id: question.id,
            flow_id: question.flow_id,
            question_type: question.question_type,
            next_question_id_a: question.next_question_id_a,
            next_question_id_b: question.next_question_id_b,
            next_question_ids: question.next_question_ids,
            order: question.order,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub product_code: String,
    pub package_name: String,
    pub cruise_line: String,
    pub ship_name: String,
    pub nights: i32,
    pub days: i32,
    pub base_price: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub itinerary_pattern: String,
}

impl From<&CruiseProduct> for ProductInfo {
    fn from(p: &CruiseProduct) -> Self {
        Self {
            product_code: p.product_code.clone(),
            package_name: p.package_name.clone(),
            cruise_line: p.cruise_line.clone(),
            ship_name: p.ship_name.clone(),
            nights: p.nights,
            days: p.days,
            base_price: p.base_price,
            start_date: p.start_date,
            end_date: p.end_date,
            itinerary_pattern: p.itinerary_pattern.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<RenderedQuestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_page_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_info: Option<ProductInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl StartResponse {
    fn unavailable(message: &str) -> Self {
        Self {
            ok: false,
            error: Some(message.to_string()),
            question: None,
            flow_id: None,
            final_page_url: None,
            product_info: None,
            user_name: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResponse {
    pub ok: bool,
    pub question: Option<RenderedQuestion>,
    pub final_page_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default, deserialize_with = "opt_i64")]
    pub flow_id: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub user_id: Option<i64>,
    pub user_phone: Option<String>,
    pub user_email: Option<String>,
    pub product_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionRequest {
    pub session_id: Option<String>,
    pub is_completed: Option<bool>,
    pub final_status: Option<String>,
    pub final_page_url: Option<String>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub duration_ms: Option<i64>,
    pub payment_status: Option<String>,
    pub payment_order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlowRequest {
    pub name: Option<String>,
    pub category: Option<String>,
    pub order: Option<i32>,
    pub final_page_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveFlowRequest {
    #[serde(default)]
    pub nodes: Vec<EditorNode>,
    #[serde(default)]
    pub edges: Vec<EditorEdge>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedFlow {
    pub ok: bool,
    pub flow_id: i64,
    pub start_question_id: Option<i64>,
    pub questions: Vec<ChatBotQuestion>,
}

/// Name shown in `{userName}`
pub fn display_user_name(user: Option<&User>) -> &str {
    user.and_then(User::display_name).unwrap_or(ANONYMOUS_USER_NAME)
}

/// Final page: the product's payment page when a product is in play, else the flow's own
fn final_page_url(flow: &ChatBotFlow, product_code: Option<&str>) -> Option<String> {
    match product_code {
        Some(code) => Some(format!("/products/{}/payment", code)),
        None => flow.final_page_url.clone(),
    }
}

pub struct ChatBotService {
    chatbot_repo: Arc<ChatBotRepository>,
    trip_repo: Arc<TripRepository>,
}

impl ChatBotService {
    pub fn new(chatbot_repo: Arc<ChatBotRepository>, trip_repo: Arc<TripRepository>) -> Self {
        Self {
            chatbot_repo,
            trip_repo,
        }
    }

    /// Product lookup failures only cost the placeholders, never the response
    async fn load_product(&self, product_code: Option<&str>) -> Option<CruiseProduct> {
        let code = clean(product_code)?.to_uppercase();
        match self.trip_repo.find_product(&code).await {
            Ok(product) => product,
            Err(e) => {
                warn!("Failed to load product {}: {}", code, e);
                None
            }
        }
    }

    async fn active_ids(&self, flow_id: i64) -> AppResult<HashSet<i64>> {
        Ok(self
            .chatbot_repo
            .active_question_ids(flow_id)
            .await?
            .into_iter()
            .collect())
    }

    pub async fn start(&self, user: Option<&User>, product_code: Option<&str>) -> AppResult<StartResponse> {
        let product = self.load_product(product_code).await;

        let Some(flow) = self.chatbot_repo.first_active_flow(PURCHASE_FLOW_CATEGORY).await? else {
            return Ok(StartResponse::unavailable("활성화된 채팅봇 플로우가 없습니다."));
        };

        // a deactivated start question falls back to the first active one
        let configured = match flow.start_question_id {
            Some(id) => self
                .chatbot_repo
                .find_question(id)
                .await?
                .filter(|q| q.is_active && q.flow_id == flow.id),
            None => None,
        };
        let question = match configured {
            Some(q) => Some(q),
            None => self.chatbot_repo.first_active_question(flow.id).await?,
        };
        let Some(mut question) = question else {
            return Ok(StartResponse::unavailable("시작 질문을 찾을 수 없습니다."));
        };

        normalize_navigation(&mut question, &self.active_ids(flow.id).await?);

        let user_name = display_user_name(user);
        let ctx = RenderContext {
            user_name,
            product: product.as_ref(),
        };
        let code = clean(product_code).map(|c| c.to_uppercase());

        debug!("Chat-bot start: flow={} question={}", flow.id, question.id);

        Ok(StartResponse {
            ok: true,
            error: None,
            question: Some(RenderedQuestion::render(question, &ctx)),
            flow_id: Some(flow.id),
            final_page_url: final_page_url(&flow, code.as_deref()),
            product_info: product.as_ref().map(ProductInfo::from),
            user_name: Some(user_name.to_string()),
        })
    }

    pub async fn question(
        &self,
        user: Option<&User>,
        question_id: i64,
        product_code: Option<&str>,
    ) -> AppResult<QuestionResponse> {
        let mut question = self
            .chatbot_repo
            .find_question(question_id)
            .await?
            .ok_or_else(|| AppError::NotFound("질문을 찾을 수 없습니다.".to_string()))?;

        let flow = self
            .chatbot_repo
            .find_flow(question.flow_id)
            .await?
            .ok_or_else(|| AppError::NotFound("플로우를 찾을 수 없습니다.".to_string()))?;

        normalize_navigation(&mut question, &self.active_ids(flow.id).await?);

        if question.is_terminal() {
            return Ok(QuestionResponse {
                ok: true,
                question: None,
                final_page_url: flow.final_page_url,
            });
        }

        let product = self.load_product(product_code).await;
        let ctx = RenderContext {
            user_name: display_user_name(user),
            product: product.as_ref(),
        };

        Ok(QuestionResponse {
            ok: true,
            question: Some(RenderedQuestion::render(question, &ctx)),
            final_page_url: flow.final_page_url,
        })
    }

    pub async fn create_session(&self, request: CreateSessionRequest) -> AppResult<ChatBotSession> {
        let flow_id = request
            .flow_id
            .ok_or_else(|| AppError::Validation("flowId가 필요합니다.".to_string()))?;

        let session = self
            .chatbot_repo
            .create_session(&NewChatSession {
                flow_id,
                user_id: request.user_id,
                user_phone: clean(request.user_phone.as_deref()),
                user_email: clean(request.user_email.as_deref()),
                product_code: clean(request.product_code.as_deref()).map(|c| c.to_uppercase()),
            })
            .await?;

        info!("Chat-bot session {} started on flow {}", session.session_id, flow_id);
        Ok(session)
    }

    pub async fn update_session(&self, request: UpdateSessionRequest) -> AppResult<ChatBotSession> {
        let raw = clean(request.session_id.as_deref())
            .ok_or_else(|| AppError::Validation("sessionId가 필요합니다.".to_string()))?;
        let session_id = Uuid::parse_str(&raw)?;

        let update = ChatSessionUpdate {
            is_completed: request.is_completed,
            final_status: request.final_status,
            final_page_url: request.final_page_url,
            ended_at: request.ended_at,
            duration_ms: request.duration_ms,
            payment_status: request.payment_status,
            payment_order_id: request.payment_order_id,
        };

        Ok(self.chatbot_repo.update_session(session_id, &update).await?)
    }

    // =========================================================================
    // Admin flow management
    // =========================================================================

    pub async fn list_flows(&self) -> AppResult<Vec<ChatBotFlow>> {
        Ok(self.chatbot_repo.list_flows().await?)
    }

    pub async fn create_flow(&self, request: CreateFlowRequest) -> AppResult<ChatBotFlow> {
        let name = clean(request.name.as_deref())
            .ok_or_else(|| AppError::Validation("플로우 이름이 필요합니다.".to_string()))?;
        let category = clean(request.category.as_deref()).unwrap_or_else(|| PURCHASE_FLOW_CATEGORY.to_string());

        let flow = self
            .chatbot_repo
            .create_flow(
                &name,
                &category,
                request.order.unwrap_or(0),
                clean(request.final_page_url.as_deref()).as_deref(),
            )
            .await?;

        info!("Created chat-bot flow {} ({})", flow.id, flow.name);
        Ok(flow)
    }

    /// Replace a flow's questions with the graph drawn in the editor
    pub async fn save_flow(&self, flow_id: i64, request: SaveFlowRequest) -> AppResult<SavedFlow> {
        self.chatbot_repo
            .find_flow(flow_id)
            .await?
            .ok_or_else(|| AppError::NotFound("플로우를 찾을 수 없습니다.".to_string()))?;

        let compiled =
            compile_flow(&request.nodes, &request.edges).map_err(|e| AppError::Validation(e.to_string()))?;

        let questions = self.chatbot_repo.replace_questions(flow_id, &compiled).await?;
        let start_question_id = self
            .chatbot_repo
            .find_flow(flow_id)
            .await?
            .and_then(|f| f.start_question_id);

        info!(
            "Saved chat-bot flow {}: {} questions, start={:?}",
            flow_id,
            questions.len(),
            start_question_id
        );

        Ok(SavedFlow {
            ok: true,
            flow_id,
            start_question_id,
            questions,
        })
    }
}
