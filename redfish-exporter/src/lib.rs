//! Exporter de télémétrie BMC Redfish.
//!
//! Interroge un contrôleur Redfish (puissance PSU, vitesse des ventilateurs,
//! températures) à intervalle fixe et sert les dernières lectures au format
//! texte Prometheus :
//! - [`redfish`] - client authentifié, découverte des capteurs
//! - [`normalize`] - documents capteurs bruts -> lectures canoniques
//! - [`cache`] - jeu de métriques courant, dernière valeur valide en cas d'échec
//! - [`scheduler`] - cycles de collecte et boucle de fond
//! - [`http`] / [`render`] - `/metrics`, `/status`, `/health`

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod models;
pub mod normalize;
pub mod redfish;
pub mod render;
pub mod scheduler;
pub mod state;
