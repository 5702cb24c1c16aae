//! REST API server implementation

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tracing::{info, warn};

use featureserver_common::config::ServerConfig;
use featureserver_common::error::Result;
use featureserver_dbase::DatabaseHandle;

use crate::handlers::{self, RestState};

/// Register the feature server routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health_handler))
        .service(
            web::scope("/rest")
                .route("/tables", web::get().to(handlers::list_tables))
                .route("/tables/{name}", web::get().to(handlers::read_table))
                .route(
                    "/tables/{name}/{property}",
                    web::get().to(handlers::distinct_values),
                ),
        );
}

/// Feature server HTTP front end
pub struct RestServer {
    config: ServerConfig,
    state: Arc<RestState>,
}

impl RestServer {
    pub fn new(config: &ServerConfig, database: Arc<DatabaseHandle>) -> Self {
        Self {
            config: config.clone(),
            state: Arc::new(RestState::new(database)),
        }
    }

    fn build_cors(origins: &[String]) -> Cors {
        if origins.is_empty() || origins.iter().any(|o| o == "*") {
            warn!("CORS is configured with wildcard origin");
            return Cors::permissive();
        }

        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::ACCEPT,
                actix_web::http::header::CONTENT_TYPE,
            ])
            .expose_headers(vec![actix_web::http::header::CONTENT_DISPOSITION])
            .max_age(3600);

        for origin in origins {
            cors = cors.allowed_origin(origin);
        }

        cors
    }

    /// Run the REST server until it is stopped
    pub async fn run(&self) -> Result<()> {
        let state = self.state.clone();
        let cors_origins = self.config.cors_origins.clone();

        info!(
            "Starting feature server on {}:{} ({} workers)",
            self.config.host, self.config.port, self.config.workers
        );

        HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(Self::build_cors(&cors_origins))
                .wrap(middleware::Compress::default())
                .wrap(middleware::Logger::default())
                .configure(configure)
        })
        .workers(self.config.workers)
        .bind(format!("{}:{}", self.config.host, self.config.port))?
        .run()
        .await?;

        info!("Feature server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::test;

    #[actix_web::test]
    async fn test_routes_registered() {
        let handle = Arc::new(DatabaseHandle::invalid("not configured"));
        let state = Arc::new(RestState::new(handle));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/rest/tables").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let req = test::TestRequest::get().uri("/rest/unknown").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[::core::prelude::v1::test]
    fn test_restrictive_cors_builds() {
        let _ = RestServer::build_cors(&["https://maps.example.org".to_string()]);
        let _ = RestServer::build_cors(&[]);
    }
}
