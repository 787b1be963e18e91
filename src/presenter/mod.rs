pub mod swap_presenter;

pub use swap_presenter::{form_model, SwapFormModel, SwapPresenter, SwapPresenterImpl};
