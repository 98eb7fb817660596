pub mod iyzico;
pub mod mock;
pub mod paypal;
pub mod stripe;

pub use iyzico::IyzicoAdapter;
pub use mock::MockAdapter;
pub use paypal::PaypalAdapter;
pub use stripe::StripeAdapter;
