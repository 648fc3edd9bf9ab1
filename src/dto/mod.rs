pub mod attempt_dto;
pub mod proctor_dto;
