pub mod conversations;
pub mod messages;
pub mod users;
pub mod wsroute;

use actix_web::web;

/// Register every route of the service.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(conversations::start_conversation)
        .service(conversations::create_group)
        .service(conversations::get_conversations)
        .service(conversations::add_users)
        .service(conversations::get_participants)
        .service(messages::send_message)
        .service(messages::get_messages)
        .service(users::search_users)
        .service(users::me)
        .service(wsroute::ws_handler)
        .route("/health", web::get().to(|| async { "OK" }));
}
