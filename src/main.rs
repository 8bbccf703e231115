use actix_web::{middleware::Logger, web, App, HttpServer};

use viva_server::{app_state::AppState, config::Config, handlers};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    config.validate_for_production();
    let bind_addr = (config.web_server_host.clone(), config.web_server_port);

    let state = AppState::new(config)
        .await
        .unwrap_or_else(|e| panic!("failed to initialize application state: {}", e));

    log::info!("Starting HTTP server on {}:{}", bind_addr.0, bind_addr.1);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .service(handlers::health_check)
            .service(handlers::create_test)
            .service(handlers::submit_part1)
            .service(handlers::submit_part2)
            .service(handlers::get_test_status)
    })
    .bind(bind_addr)?
    .run()
    .await
}
