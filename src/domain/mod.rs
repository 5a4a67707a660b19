// Domain layer: register/port models and the two collaborator capabilities.

pub mod model;
pub mod ports;
